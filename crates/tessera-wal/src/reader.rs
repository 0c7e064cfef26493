//! Log file reader
//!
//! open_for_read inspects the self-describing header, resolves the cipher
//! module it names, and hands back a record stream. Three header
//! generations are understood:
//!
//! - v3: magic, cipher module name, module parameter blob
//! - v2: magic, flat string option map; an empty map means the null cipher,
//!   otherwise the map names the module and carries its parameters
//! - pre-v2: no magic at all; the reader rewinds to offset 0 and treats the
//!   whole file as plaintext records

use std::io::{Read, Seek, SeekFrom};

use hashbrown::HashMap;

use crate::codec::{self, LogKey, LogValue, V2_MAGIC, V3_MAGIC};
use crate::crypto::{CryptoRegistry, NULL_CRYPTO_NAME, OPT_MODULE};
use crate::error::{WalError, WalResult};
use crate::sink::{BlockStore, ReaderCursor};

/// Decodes one log file front to back.
pub struct LogFileReader {
    records: Box<dyn Read>,
    module_name: String,
    done: bool,
}

/// Open a log file for decoding, resolving its cipher from the header.
pub fn open_for_read(
    store: &dyn BlockStore,
    registry: &CryptoRegistry,
    path: &str,
) -> WalResult<LogFileReader> {
    let mut cursor = ReaderCursor::new(store.open_for_read(path)?);

    let mut magic = vec![0u8; V3_MAGIC.len()];
    let got = read_up_to(&mut cursor, &mut magic)?;

    let bad_header = |reason: String| WalError::BadHeader {
        path: path.into(),
        reason,
    };

    if got == magic.len() && magic == V3_MAGIC {
        let module_name =
            codec::read_utf8(&mut cursor).map_err(|e| bad_header(format!("module name: {}", e)))?;
        let param_bytes =
            codec::read_bytes(&mut cursor).map_err(|e| bad_header(format!("cipher parameters: {}", e)))?;

        let module = registry.get(&module_name)?;
        let params = crate::crypto::CryptoParams::new(param_bytes);
        let records = module.wrap_reader(Box::new(cursor), &params)?;
        return Ok(LogFileReader {
            records,
            module_name,
            done: false,
        });
    }

    if got == magic.len() && magic == V2_MAGIC {
        let count = codec::read_u32_count(&mut cursor, "v2 option count")
            .map_err(|e| bad_header(format!("option count: {}", e)))?;

        if count == 0 {
            // Empty option map: the null cipher, records follow directly
            return Ok(LogFileReader {
                records: Box::new(cursor),
                module_name: NULL_CRYPTO_NAME.to_string(),
                done: false,
            });
        }

        let mut options = HashMap::new();
        for _ in 0..count {
            let key = codec::read_utf8(&mut cursor)
                .map_err(|e| bad_header(format!("option key: {}", e)))?;
            let value = codec::read_utf8(&mut cursor)
                .map_err(|e| bad_header(format!("option value: {}", e)))?;
            options.insert(key, value);
        }

        let module_name = options
            .get(OPT_MODULE)
            .cloned()
            .ok_or_else(|| bad_header(format!("v2 options missing {}", OPT_MODULE)))?;
        let module = registry.get(&module_name)?;
        let params = module.params_from_options(&options)?;
        let records = module.wrap_reader(Box::new(cursor), &params)?;
        return Ok(LogFileReader {
            records,
            module_name,
            done: false,
        });
    }

    // No magic: a pre-v2 file. Rewind and read plaintext records.
    cursor.seek(SeekFrom::Start(0)).map_err(|e| bad_header(format!("rewind: {}", e)))?;
    Ok(LogFileReader {
        records: Box::new(cursor),
        module_name: NULL_CRYPTO_NAME.to_string(),
        done: false,
    })
}

impl LogFileReader {
    /// Cipher module name the header resolved to.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Decode the next record. Ok(None) once the stream ends cleanly at a
    /// record boundary; Corrupt if it ends inside one.
    pub fn next_record(&mut self) -> WalResult<Option<(LogKey, LogValue)>> {
        if self.done {
            return Ok(None);
        }
        match codec::read_record(&mut self.records) {
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            other => other,
        }
    }
}

/// Fill as much of buf as the stream has, tolerating a short file.
fn read_up_to(reader: &mut dyn Read, buf: &mut [u8]) -> WalResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{
        AesGcmCryptoModule, CryptoModule, CryptoRegistry, AES_GCM_CRYPTO_NAME, OPT_NONCE_PREFIX,
        OPT_WRAPPED_KEY,
    };
    use crate::codec::{encode_record, LogEvent, Mutation};
    use crate::error::WalError;
    use crate::sink::{BlockReader, BlockSink};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Store whose file contents tests write directly.
    struct TestStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl TestStore {
        fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
            }
        }

        fn put(&self, path: &str, bytes: Vec<u8>) {
            self.files.lock().insert(path.to_string(), bytes);
        }
    }

    impl BlockStore for TestStore {
        fn create(
            &self,
            _path: &str,
            _replication: u16,
            _block_size: u64,
            _sync_mode: bool,
        ) -> WalResult<Arc<dyn BlockSink>> {
            unreachable!("reader tests never create files through the store")
        }

        fn open_for_read(&self, path: &str) -> WalResult<Box<dyn BlockReader>> {
            let data = self.files.lock().get(path).cloned().ok_or(WalError::Io {
                path: Some(path.into()),
                kind: std::io::ErrorKind::NotFound,
                message: "no such test file".to_string(),
            })?;
            Ok(Box::new(TestReader { data }))
        }

        fn default_replication(&self, _path: &str) -> u16 {
            1
        }

        fn default_block_size(&self) -> u64 {
            1024
        }
    }

    struct TestReader {
        data: Vec<u8>,
    }

    impl BlockReader for TestReader {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> WalResult<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = (self.data.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }

        fn len(&self) -> u64 {
            self.data.len() as u64
        }
    }

    fn put_utf8(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn sample_records() -> Vec<u8> {
        let mut bytes = encode_record(&codec::LogKey::open("legacy-session"), &codec::LogValue::empty());
        bytes.extend_from_slice(&encode_record(
            &codec::LogKey::many_mutations(1, 3),
            &codec::LogValue::new(vec![Mutation::new(&b"r"[..]).put("cf", "cq", b"v")]),
        ));
        bytes
    }

    fn drain(reader: &mut LogFileReader) -> Vec<(LogKey, LogValue)> {
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_v2_empty_options_reads_like_v3_null() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();

        // v2: magic, zero options, plaintext records
        let mut v2 = V2_MAGIC.to_vec();
        v2.extend_from_slice(&0u32.to_le_bytes());
        v2.extend_from_slice(&sample_records());
        store.put("v2-file", v2);

        // v3 with the null cipher over identical records
        let mut v3 = codec::encode_file_header(NULL_CRYPTO_NAME, &[]);
        v3.extend_from_slice(&sample_records());
        store.put("v3-file", v3);

        let mut v2_reader = open_for_read(&store, &registry, "v2-file").unwrap();
        let mut v3_reader = open_for_read(&store, &registry, "v3-file").unwrap();
        assert_eq!(v2_reader.module_name(), NULL_CRYPTO_NAME);

        let v2_records = drain(&mut v2_reader);
        let v3_records = drain(&mut v3_reader);
        assert_eq!(v2_records.len(), 2);
        assert_eq!(v2_records, v3_records);
        assert_eq!(v2_records[0].0.event, LogEvent::Open);
        assert_eq!(
            v2_records[0].0.session_id.as_deref(),
            Some("legacy-session")
        );
        assert_eq!(v2_records[1].1.mutations[0].updates[0].family, "cf");
    }

    #[test]
    fn test_pre_v2_plaintext_rewinds_to_offset_zero() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();
        store.put("ancient", sample_records());

        let mut reader = open_for_read(&store, &registry, "ancient").unwrap();
        let records = drain(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0.event, LogEvent::Open);
    }

    #[test]
    fn test_v3_aes_gcm_end_to_end() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();
        let module = Arc::new(AesGcmCryptoModule::new(&[3u8; 32]));
        registry.register(module.clone());

        let params = module.init_params().unwrap();
        let header = codec::encode_file_header(AES_GCM_CRYPTO_NAME, params.as_bytes());

        // Encrypt the records through the module's own stream
        let frames = Arc::new(Mutex::new(Vec::new()));
        struct FrameSink(Arc<Mutex<Vec<u8>>>);
        impl BlockSink for FrameSink {
            fn append(&self, buf: &[u8]) -> WalResult<()> {
                self.0.lock().extend_from_slice(buf);
                Ok(())
            }
            fn flush_to_peers(&self) -> WalResult<()> {
                Ok(())
            }
            fn sync_to_disk(&self) -> WalResult<()> {
                Ok(())
            }
            fn supports_sync_to_disk(&self) -> bool {
                true
            }
            fn close(&self) -> WalResult<()> {
                Ok(())
            }
        }

        let mut stream = module
            .wrap_writer(Arc::new(FrameSink(frames.clone())), &params)
            .unwrap();
        stream.write(&sample_records()).unwrap();
        stream.finish().unwrap();

        let mut file = header;
        file.extend_from_slice(&frames.lock());
        store.put("encrypted", file);

        let mut reader = open_for_read(&store, &registry, "encrypted").unwrap();
        assert_eq!(reader.module_name(), AES_GCM_CRYPTO_NAME);
        let records = drain(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].1.mutations[0].row, b"r");
    }

    #[test]
    fn test_v2_option_map_names_default_cipher() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();
        let module = Arc::new(AesGcmCryptoModule::new(&[5u8; 32]));
        registry.register(module.clone());

        let params = module.init_params().unwrap();

        // Split the blob into the legacy option map the way old writers did:
        // kek nonce || wrapped key under one option, nonce prefix under another
        let bytes = params.as_bytes();
        let prefix_start = bytes.len() - 4;
        let mut kek_and_wrapped = bytes[1..13].to_vec();
        kek_and_wrapped.extend_from_slice(&bytes[17..prefix_start]);

        let mut file = V2_MAGIC.to_vec();
        file.extend_from_slice(&3u32.to_le_bytes());
        put_utf8(&mut file, OPT_MODULE);
        put_utf8(&mut file, AES_GCM_CRYPTO_NAME);
        put_utf8(&mut file, OPT_WRAPPED_KEY);
        put_utf8(&mut file, &hex::encode(&kek_and_wrapped));
        put_utf8(&mut file, OPT_NONCE_PREFIX);
        put_utf8(&mut file, &hex::encode(&bytes[prefix_start..]));

        struct FrameSink(Arc<Mutex<Vec<u8>>>);
        impl BlockSink for FrameSink {
            fn append(&self, buf: &[u8]) -> WalResult<()> {
                self.0.lock().extend_from_slice(buf);
                Ok(())
            }
            fn flush_to_peers(&self) -> WalResult<()> {
                Ok(())
            }
            fn sync_to_disk(&self) -> WalResult<()> {
                Ok(())
            }
            fn supports_sync_to_disk(&self) -> bool {
                true
            }
            fn close(&self) -> WalResult<()> {
                Ok(())
            }
        }
        let frames = Arc::new(Mutex::new(Vec::new()));
        let mut stream = module
            .wrap_writer(Arc::new(FrameSink(frames.clone())), &params)
            .unwrap();
        stream.write(&sample_records()).unwrap();
        stream.finish().unwrap();
        file.extend_from_slice(&frames.lock());

        store.put("v2-default", file);

        let mut reader = open_for_read(&store, &registry, "v2-default").unwrap();
        assert_eq!(reader.module_name(), AES_GCM_CRYPTO_NAME);
        let records = drain(&mut reader);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_unknown_module_in_header_is_an_error() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();

        let file = codec::encode_file_header("tessera.crypto.Missing", &[]);
        store.put("mystery", file);

        let result = open_for_read(&store, &registry, "mystery");
        assert!(matches!(
            result,
            Err(WalError::UnknownCryptoModule { .. })
        ));
    }

    #[test]
    fn test_truncated_v3_header_is_bad_header() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();

        let mut file = V3_MAGIC.to_vec();
        file.extend_from_slice(&[0xFF, 0xFF]); // mangled module-name length
        store.put("stub", file);

        let result = open_for_read(&store, &registry, "stub");
        assert!(matches!(result, Err(WalError::BadHeader { .. })));
    }

    #[test]
    fn test_truncated_record_tail_is_corrupt() {
        let store = TestStore::new();
        let registry = CryptoRegistry::new();

        let mut file = codec::encode_file_header(NULL_CRYPTO_NAME, &[]);
        let records = sample_records();
        file.extend_from_slice(&records[..records.len() - 4]);
        store.put("torn", file);

        let mut reader = open_for_read(&store, &registry, "torn").unwrap();
        // First record is intact
        assert!(reader.next_record().unwrap().is_some());
        // Second ends mid-record
        assert!(matches!(
            reader.next_record(),
            Err(WalError::Corrupt { .. })
        ));
    }
}
