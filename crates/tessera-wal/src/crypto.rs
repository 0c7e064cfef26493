//! Cipher modules for log files
//!
//! A log file names the module that enciphered it in its own header, along
//! with a parameter blob the module wrote at open time. Everything needed to
//! decrypt is recoverable from the file plus the module's configured key;
//! no external keyring is consulted at read time.
//!
//! Modules live in a registry keyed by a stable name string. The name is
//! embedded verbatim in v3 headers and resolved once per file open.
//!
//! Ciphertext layout: the record stream is a sequence of sealed frames, one
//! frame per group-commit batch:
//!
//! ```text
//! [u32 ct_len LE][12B nonce][ciphertext + 16B tag]
//! ```
//!
//! Frame nonces are prefix(4) || counter(8 LE), unique within a file.

use std::io::{self, Read};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{WalError, WalResult};
use crate::sink::BlockSink;

/// Registry name of the passthrough module
pub const NULL_CRYPTO_NAME: &str = "tessera.crypto.Null";

/// Registry name of the AES-256-GCM module
pub const AES_GCM_CRYPTO_NAME: &str = "tessera.crypto.AesGcm";

/// v2 option-map key naming the cipher module
pub const OPT_MODULE: &str = "crypto.module";

/// v2 option-map key holding the hex kek-nonce || wrapped data key
pub const OPT_WRAPPED_KEY: &str = "crypto.wrapped.key";

/// v2 option-map key holding the hex 4-byte frame nonce prefix
pub const OPT_NONCE_PREFIX: &str = "crypto.nonce.prefix";

/// Largest ciphertext frame a reader will allocate for
const MAX_FRAME_LEN: u32 = 1 << 30;

const KEK_NONCE_LEN: usize = 12;
const FRAME_NONCE_LEN: usize = 12;
const DATA_KEY_LEN: usize = 32;
const NONCE_PREFIX_LEN: usize = 4;

/// Opaque module-specific parameter blob embedded in the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoParams {
    bytes: Vec<u8>,
}

impl CryptoParams {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Byte-oriented writer that transparently enciphers into a BlockSink.
///
/// write() buffers plaintext; flush() seals the buffered bytes into one
/// frame and appends it to the sink. The WAL writer flushes inside its
/// append mutex so that the sync worker's sink-level sync covers every
/// enqueued byte.
pub trait CipherStream: Send {
    fn write(&mut self, buf: &[u8]) -> WalResult<()>;

    /// Seal the current frame and push it to the sink. No-op when empty.
    fn flush(&mut self) -> WalResult<()>;

    /// Seal any residue at close time.
    fn finish(&mut self) -> WalResult<()>;
}

/// A cipher implementation resolvable by name.
pub trait CryptoModule: Send + Sync {
    /// Stable registry name, embedded verbatim in v3 headers.
    fn name(&self) -> &str;

    /// One-time per-file parameters (data key, nonce prefix, ...), written
    /// into the header by the WAL writer.
    fn init_params(&self) -> WalResult<CryptoParams>;

    /// Wrap the sink in an enciphering stream.
    fn wrap_writer(
        &self,
        sink: Arc<dyn BlockSink>,
        params: &CryptoParams,
    ) -> WalResult<Box<dyn CipherStream>>;

    /// Wrap a raw reader in a deciphering stream.
    fn wrap_reader(&self, reader: Box<dyn Read>, params: &CryptoParams)
        -> WalResult<Box<dyn Read>>;

    /// Compatibility path for legacy v2 headers, which carry a flat string
    /// map instead of a parameter blob. Values are hex-encoded.
    fn params_from_options(&self, options: &HashMap<String, String>) -> WalResult<CryptoParams>;
}

/// Maps module names to implementations. A fresh registry always contains
/// the null module. Collaborator object, not a process global: tests
/// construct their own.
pub struct CryptoRegistry {
    modules: RwLock<HashMap<String, Arc<dyn CryptoModule>>>,
}

impl CryptoRegistry {
    pub fn new() -> Self {
        let registry = Self {
            modules: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(NullCryptoModule));
        registry
    }

    pub fn register(&self, module: Arc<dyn CryptoModule>) {
        let mut modules = self.modules.write();
        modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> WalResult<Arc<dyn CryptoModule>> {
        let modules = self.modules.read();
        modules
            .get(name)
            .cloned()
            .ok_or_else(|| WalError::UnknownCryptoModule {
                name: name.to_string(),
            })
    }
}

impl Default for CryptoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel module: returns the stream unchanged.
pub struct NullCryptoModule;

impl CryptoModule for NullCryptoModule {
    fn name(&self) -> &str {
        NULL_CRYPTO_NAME
    }

    fn init_params(&self) -> WalResult<CryptoParams> {
        Ok(CryptoParams::empty())
    }

    fn wrap_writer(
        &self,
        sink: Arc<dyn BlockSink>,
        _params: &CryptoParams,
    ) -> WalResult<Box<dyn CipherStream>> {
        Ok(Box::new(NullStream { sink }))
    }

    fn wrap_reader(
        &self,
        reader: Box<dyn Read>,
        _params: &CryptoParams,
    ) -> WalResult<Box<dyn Read>> {
        Ok(reader)
    }

    fn params_from_options(&self, _options: &HashMap<String, String>) -> WalResult<CryptoParams> {
        Ok(CryptoParams::empty())
    }
}

struct NullStream {
    sink: Arc<dyn BlockSink>,
}

impl CipherStream for NullStream {
    fn write(&mut self, buf: &[u8]) -> WalResult<()> {
        self.sink.append(buf)
    }

    fn flush(&mut self) -> WalResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> WalResult<()> {
        Ok(())
    }
}

/// AES-256-GCM module.
///
/// Holds a key-encryption key. Each file gets a random data key, wrapped
/// under the KEK and stored in the header parameters:
///
/// ```text
/// [u8 version=1][12B kek nonce][u32 wrapped_len LE][wrapped key][4B nonce prefix]
/// ```
pub struct AesGcmCryptoModule {
    kek: Aes256Gcm,
}

impl AesGcmCryptoModule {
    pub fn new(key: &[u8; DATA_KEY_LEN]) -> Self {
        Self {
            kek: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    fn init_err(reason: impl Into<String>) -> WalError {
        WalError::CryptoInit {
            module: AES_GCM_CRYPTO_NAME.to_string(),
            reason: reason.into(),
        }
    }

    /// Unwrap the per-file data key and nonce prefix from a parameter blob.
    fn unwrap_params(&self, params: &CryptoParams) -> WalResult<(Aes256Gcm, [u8; NONCE_PREFIX_LEN])> {
        let bytes = params.as_bytes();
        if bytes.len() < 1 + KEK_NONCE_LEN + 4 + NONCE_PREFIX_LEN {
            return Err(Self::init_err("parameter blob too short"));
        }
        if bytes[0] != 1 {
            return Err(Self::init_err(format!(
                "unsupported parameter version {}",
                bytes[0]
            )));
        }

        let kek_nonce = &bytes[1..1 + KEK_NONCE_LEN];
        let len_start = 1 + KEK_NONCE_LEN;
        let wrapped_len = u32::from_le_bytes([
            bytes[len_start],
            bytes[len_start + 1],
            bytes[len_start + 2],
            bytes[len_start + 3],
        ]) as usize;

        let wrapped_start = len_start + 4;
        let wrapped_end = wrapped_start + wrapped_len;
        if bytes.len() != wrapped_end + NONCE_PREFIX_LEN {
            return Err(Self::init_err("parameter blob length mismatch"));
        }

        let wrapped = &bytes[wrapped_start..wrapped_end];
        let data_key = self
            .kek
            .decrypt(Nonce::from_slice(kek_nonce), wrapped)
            .map_err(|_| Self::init_err("data key failed authentication"))?;
        if data_key.len() != DATA_KEY_LEN {
            return Err(Self::init_err("unwrapped data key has wrong length"));
        }

        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&bytes[wrapped_end..]);

        let cipher = Aes256Gcm::new_from_slice(&data_key)
            .map_err(|_| Self::init_err("unwrapped data key rejected"))?;
        Ok((cipher, prefix))
    }
}

impl CryptoModule for AesGcmCryptoModule {
    fn name(&self) -> &str {
        AES_GCM_CRYPTO_NAME
    }

    fn init_params(&self) -> WalResult<CryptoParams> {
        let mut data_key = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut data_key);
        let mut kek_nonce = [0u8; KEK_NONCE_LEN];
        OsRng.fill_bytes(&mut kek_nonce);
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);

        let wrapped = self
            .kek
            .encrypt(Nonce::from_slice(&kek_nonce), data_key.as_ref())
            .map_err(|_| Self::init_err("failed to wrap data key"))?;

        let mut bytes = Vec::with_capacity(1 + KEK_NONCE_LEN + 4 + wrapped.len() + NONCE_PREFIX_LEN);
        bytes.push(1u8);
        bytes.extend_from_slice(&kek_nonce);
        bytes.extend_from_slice(&(wrapped.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&wrapped);
        bytes.extend_from_slice(&prefix);
        Ok(CryptoParams::new(bytes))
    }

    fn wrap_writer(
        &self,
        sink: Arc<dyn BlockSink>,
        params: &CryptoParams,
    ) -> WalResult<Box<dyn CipherStream>> {
        let (cipher, prefix) = self.unwrap_params(params)?;
        Ok(Box::new(AesGcmStream {
            sink,
            cipher,
            prefix,
            counter: 0,
            buf: Vec::new(),
        }))
    }

    fn wrap_reader(
        &self,
        reader: Box<dyn Read>,
        params: &CryptoParams,
    ) -> WalResult<Box<dyn Read>> {
        let (cipher, _prefix) = self.unwrap_params(params)?;
        Ok(Box::new(AesGcmReader {
            inner: reader,
            cipher,
            plain: Vec::new(),
            pos: 0,
        }))
    }

    fn params_from_options(&self, options: &HashMap<String, String>) -> WalResult<CryptoParams> {
        let wrapped_hex = options
            .get(OPT_WRAPPED_KEY)
            .ok_or_else(|| Self::init_err(format!("v2 options missing {}", OPT_WRAPPED_KEY)))?;
        let prefix_hex = options
            .get(OPT_NONCE_PREFIX)
            .ok_or_else(|| Self::init_err(format!("v2 options missing {}", OPT_NONCE_PREFIX)))?;

        let wrapped = hex::decode(wrapped_hex)
            .map_err(|e| Self::init_err(format!("bad {} hex: {}", OPT_WRAPPED_KEY, e)))?;
        let prefix = hex::decode(prefix_hex)
            .map_err(|e| Self::init_err(format!("bad {} hex: {}", OPT_NONCE_PREFIX, e)))?;

        if wrapped.len() <= KEK_NONCE_LEN {
            return Err(Self::init_err("v2 wrapped key too short"));
        }
        if prefix.len() != NONCE_PREFIX_LEN {
            return Err(Self::init_err("v2 nonce prefix must be 4 bytes"));
        }

        // Reassemble the v3 blob: the option map splits it at the kek nonce
        let ct_len = wrapped.len() - KEK_NONCE_LEN;
        let mut bytes = Vec::with_capacity(1 + wrapped.len() + 4 + NONCE_PREFIX_LEN);
        bytes.push(1u8);
        bytes.extend_from_slice(&wrapped[..KEK_NONCE_LEN]);
        bytes.extend_from_slice(&(ct_len as u32).to_le_bytes());
        bytes.extend_from_slice(&wrapped[KEK_NONCE_LEN..]);
        bytes.extend_from_slice(&prefix);
        Ok(CryptoParams::new(bytes))
    }
}

struct AesGcmStream {
    sink: Arc<dyn BlockSink>,
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u64,
    buf: Vec<u8>,
}

impl CipherStream for AesGcmStream {
    fn write(&mut self, buf: &[u8]) -> WalResult<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> WalResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let mut nonce = [0u8; FRAME_NONCE_LEN];
        nonce[..NONCE_PREFIX_LEN].copy_from_slice(&self.prefix);
        nonce[NONCE_PREFIX_LEN..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buf.as_slice())
            .map_err(|_| WalError::CipherFailed {
                reason: "frame encryption failed".to_string(),
            })?;

        let mut frame = Vec::with_capacity(4 + FRAME_NONCE_LEN + ciphertext.len());
        frame.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);

        self.sink.append(&frame)?;
        self.buf.clear();
        Ok(())
    }

    fn finish(&mut self) -> WalResult<()> {
        self.flush()
    }
}

struct AesGcmReader {
    inner: Box<dyn Read>,
    cipher: Aes256Gcm,
    plain: Vec<u8>,
    pos: usize,
}

impl AesGcmReader {
    /// Read and decrypt the next frame. Ok(false) on clean end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(&mut self.inner, &mut len_buf)? {
            return Ok(false);
        }

        let ct_len = u32::from_le_bytes(len_buf);
        if ct_len == 0 || ct_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("implausible cipher frame length {}", ct_len),
            ));
        }

        let mut nonce = [0u8; FRAME_NONCE_LEN];
        self.inner.read_exact(&mut nonce)?;

        let mut ciphertext = vec![0u8; ct_len as usize];
        self.inner.read_exact(&mut ciphertext)?;

        self.plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "cipher frame failed authentication",
                )
            })?;
        self.pos = 0;
        Ok(true)
    }
}

impl Read for AesGcmReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plain.len() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let n = (self.plain.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// read_exact that reports a clean EOF before the first byte as Ok(false).
fn read_exact_or_eof(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a cipher frame header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
