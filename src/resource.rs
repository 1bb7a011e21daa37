//! Resource Engine: the state machine for a single in-progress resource
//! download. States are kept explicit (Idle, Announced, Connecting,
//! Streaming, Finalising) rather than derived from a pair of flags.

use md5::{Digest, Md5};

use crate::codec::ResourceDirective;
use crate::named::Name;
use crate::registry::ResourceTable;
use crate::transport::HttpResource;

/// Maximum number of retries before a download fails terminally.
pub const MAX_RETRIES: u8 = 4;

/// Bytes requested from [`HttpResource::read`] per engine tick. Bounds how
/// long a single `process_get` call can occupy the session thread.
const CHUNK_SIZE: usize = 512;

/// Result codes for a resource-update directive. Order matters: callers may
/// depend on the underlying discriminant values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    OkFound = 0,
    NotFound = 1,
    WrongVersion = 2,
    SameVersion = 3,
    BadUri = 4,
    InternalError = 5,
    Busy = 6,
}

/// Notify-callback completion codes.
pub const NOTIFY_SUCCESS: u8 = 1;
pub const NOTIFY_MD5_FAILURE: u8 = 2;

/// Explicit states of a single resource download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Idle,
    Announced,
    Connecting,
    Streaming,
    Finalising,
}

struct InProgress {
    cid: u32,
    resource_name: Name,
    new_version: Name,
    old_version: Name,
    uri: String,
    total_size: u64,
    offset: u64,
    expected_md5: [u8; 16],
    hasher: Md5,
    retry_count: u8,
}

/// The resource engine: owns at most one in-progress download at a time.
pub struct ResourceEngine {
    state: ResourceState,
    in_progress: Option<InProgress>,
    max_retries: u8,
}

impl Default for ResourceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceEngine {
    pub fn new() -> Self {
        Self {
            state: ResourceState::Idle,
            in_progress: None,
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the retry bound (`spec.md`'s `ClientConfig::resource_retry_limit`)
    /// instead of the [`MAX_RETRIES`] default.
    pub fn with_retry_limit(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// cid of the in-progress download, or 0 if idle.
    pub fn cid(&self) -> u32 {
        self.in_progress.as_ref().map(|p| p.cid).unwrap_or(0)
    }

    /// Validate and accept an inbound resource-update directive.
    pub fn accept(&mut self, directive: ResourceDirective, resources: &ResourceTable) -> ResultCode {
        if self.in_progress.is_some() {
            return ResultCode::Busy;
        }
        let Some(descriptor) = resources.find(&directive.name) else {
            return ResultCode::NotFound;
        };
        if descriptor.version().as_str() != directive.old_version {
            return ResultCode::WrongVersion;
        }
        if directive.new_version == directive.old_version {
            return ResultCode::SameVersion;
        }
        if directive.uri.is_empty() {
            return ResultCode::BadUri;
        }
        let Ok(resource_name) = Name::try_from(directive.name.as_str()) else {
            return ResultCode::InternalError;
        };
        let Ok(new_version) = Name::try_from(directive.new_version.as_str()) else {
            return ResultCode::InternalError;
        };
        let Ok(old_version) = Name::try_from(directive.old_version.as_str()) else {
            return ResultCode::InternalError;
        };
        self.in_progress = Some(InProgress {
            cid: directive.cid,
            resource_name,
            new_version,
            old_version,
            uri: directive.uri,
            total_size: directive.size,
            offset: 0,
            expected_md5: directive.md5,
            hasher: Md5::new(),
            retry_count: 0,
        });
        self.state = ResourceState::Announced;
        ResultCode::OkFound
    }

    /// Drive one iteration of the in-progress download, if any. Called once
    /// per publish-pipeline pass.
    pub fn process_get(&mut self, resources: &ResourceTable, http: &mut dyn HttpResource) {
        if self.in_progress.is_none() {
            return;
        }
        match self.state {
            ResourceState::Idle => {}
            ResourceState::Announced => {
                self.state = ResourceState::Connecting;
            }
            ResourceState::Connecting => {
                let (uri, offset, size) = {
                    let progress = self.in_progress.as_ref().expect("connecting implies in-progress");
                    (progress.uri.clone(), progress.offset, progress.total_size)
                };
                match http.open(&uri, offset, size) {
                    Ok(()) => self.state = ResourceState::Streaming,
                    Err(_) => self.retry(resources),
                }
            }
            ResourceState::Streaming => self.stream(resources, http),
            ResourceState::Finalising => self.finalise(resources),
        }
    }

    fn stream(&mut self, resources: &ResourceTable, http: &mut dyn HttpResource) {
        let mut buf = [0u8; CHUNK_SIZE];
        match http.read(&mut buf) {
            Ok(0) => self.retry(resources),
            Ok(n) => {
                let resource_name = {
                    let progress = self.in_progress.as_mut().expect("streaming implies in-progress");
                    progress.hasher.update(&buf[..n]);
                    progress.offset += n as u64;
                    progress.resource_name.clone()
                };
                let offset = self.in_progress.as_ref().expect("streaming implies in-progress").offset;
                if let Some(descriptor) = resources.find(&resource_name) {
                    descriptor.push_data(&buf[..n], offset);
                }
                let total_size = self.in_progress.as_ref().expect("streaming implies in-progress").total_size;
                if offset >= total_size {
                    self.state = ResourceState::Finalising;
                }
            }
            Err(_) => self.retry(resources),
        }
    }

    fn retry(&mut self, resources: &ResourceTable) {
        let (resource_name, retry_count, offset) = {
            let progress = self.in_progress.as_mut().expect("retry implies in-progress");
            progress.retry_count += 1;
            (progress.resource_name.clone(), progress.retry_count, progress.offset)
        };
        if retry_count < self.max_retries {
            log::warn!("resource {resource_name}: retry {retry_count}/{} at offset {offset}", self.max_retries);
            self.state = ResourceState::Announced;
        } else {
            log::warn!("resource {resource_name}: retries exhausted, failing");
            self.complete(resources, NOTIFY_MD5_FAILURE);
        }
    }

    fn finalise(&mut self, resources: &ResourceTable) {
        let (resource_name, matches) = {
            let progress = self.in_progress.as_ref().expect("finalise implies in-progress");
            let digest = progress.hasher.clone().finalize();
            (progress.resource_name.clone(), digest.as_slice() == progress.expected_md5.as_slice())
        };
        if matches {
            log::info!("resource {resource_name} download complete, MD5 verified");
            self.complete(resources, NOTIFY_SUCCESS);
        } else {
            log::warn!("resource {resource_name} MD5 mismatch");
            self.complete(resources, NOTIFY_MD5_FAILURE);
        }
    }

    fn complete(&mut self, resources: &ResourceTable, code: u8) {
        if let Some(progress) = self.in_progress.take() {
            if let Some(descriptor) = resources.find(&progress.resource_name) {
                if code == NOTIFY_SUCCESS {
                    descriptor.set_version(progress.new_version);
                }
                descriptor.notify(code);
            }
            resources.mark_dirty();
        }
        self.state = ResourceState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testsupport::StubHttp;

    fn directive(md5_hex: &str) -> ResourceDirective {
        ResourceDirective {
            cid: 7,
            name: "firmware".into(),
            old_version: "1.0".into(),
            new_version: "1.1".into(),
            uri: "http://h/f".into(),
            size: 8,
            md5: {
                let bytes = hex::decode(md5_hex).unwrap();
                let mut out = [0u8; 16];
                out.copy_from_slice(&bytes);
                out
            },
        }
    }

    fn table_with_firmware() -> ResourceTable {
        let mut table = ResourceTable::default();
        table
            .attach("firmware", "1.0", Box::new(|_code| {}), Box::new(|_bytes, _off| {}))
            .unwrap();
        table
    }

    fn drive_to_completion(engine: &mut ResourceEngine, table: &ResourceTable, http: &mut StubHttp) {
        for _ in 0..64 {
            if engine.cid() == 0 {
                return;
            }
            engine.process_get(table, http);
        }
        panic!("engine did not reach completion within the iteration budget");
    }

    #[test]
    fn successful_download_notifies_once_and_resets_cid() {
        let body = b"abcdefgh".to_vec();
        let digest = format!("{:x}", Md5::digest(&body));
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        assert_eq!(engine.accept(directive(&digest), &table), ResultCode::OkFound);
        let mut http = StubHttp::new(body);
        drive_to_completion(&mut engine, &table, &mut http);
        assert_eq!(engine.cid(), 0);
        assert!(table.is_dirty());
    }

    #[test]
    fn md5_mismatch_fails_without_further_http_opens() {
        let body = b"abcdefgh".to_vec();
        let wrong_digest = "00000000000000000000000000000000".to_string();
        let wrong_digest = &wrong_digest[..32];
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        assert_eq!(engine.accept(directive(wrong_digest), &table), ResultCode::OkFound);
        let mut http = StubHttp::new(body);
        drive_to_completion(&mut engine, &table, &mut http);
        assert_eq!(engine.cid(), 0);
    }

    #[test]
    fn wrong_version_rejected_without_starting_download() {
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        let mut dir = directive("00000000000000000000000000000000");
        dir.old_version = "0.9".into();
        assert_eq!(engine.accept(dir, &table), ResultCode::WrongVersion);
        assert_eq!(engine.state(), ResourceState::Idle);
    }

    #[test]
    fn unknown_resource_name_rejected() {
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        let mut dir = directive("00000000000000000000000000000000");
        dir.name = "other".into();
        assert_eq!(engine.accept(dir, &table), ResultCode::NotFound);
    }

    #[test]
    fn busy_rejects_concurrent_directive() {
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        let digest = format!("{:x}", Md5::digest(b"abcdefgh"));
        assert_eq!(engine.accept(directive(&digest), &table), ResultCode::OkFound);
        assert_eq!(engine.accept(directive(&digest), &table), ResultCode::Busy);
    }

    #[test]
    fn with_retry_limit_overrides_the_default_bound() {
        let body = b"abcdefgh".to_vec();
        let digest = format!("{:x}", Md5::digest(&body));
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new().with_retry_limit(1);
        assert_eq!(engine.accept(directive(&digest), &table), ResultCode::OkFound);
        let mut http = StubHttp::new(body);
        http.stalls_before_data = 10;
        for _ in 0..8 {
            if engine.cid() == 0 {
                break;
            }
            engine.process_get(&table, &mut http);
        }
        assert_eq!(engine.cid(), 0, "engine should fail terminally well before the default MAX_RETRIES bound");
    }

    #[test]
    fn retries_exhausted_after_four_stalls_fails_terminally() {
        let body = b"abcdefgh".to_vec();
        let digest = format!("{:x}", Md5::digest(&body));
        let table = table_with_firmware();
        let mut engine = ResourceEngine::new();
        assert_eq!(engine.accept(directive(&digest), &table), ResultCode::OkFound);
        let mut http = StubHttp::new(body);
        http.stalls_before_data = 10; // always stalls: forces retry exhaustion
        for _ in 0..32 {
            if engine.cid() == 0 {
                break;
            }
            engine.process_get(&table, &mut http);
        }
        assert_eq!(engine.cid(), 0);
    }
}
