//! Device identity: client id and password derivation, plus the DNS/FQDN
//! indirection seam named in the public facade. Resolution itself stays out
//! of scope; `Resolver` exists so a host program can plug one in.

use heapless::String as HString;

use crate::error::Error;

/// Resolves a configured FQDN to a connectable address. Out of scope for
/// this crate to implement; `NoopResolver` is the default when a host
/// program has no use for indirection and connects to `ClientConfig::host`
/// directly.
pub trait Resolver: Send {
    fn set_fqdn(&mut self, fqdn: &str);
    fn resolve(&self) -> Option<String>;
}

/// Default resolver: never resolves anything, always falls back to the
/// configured host.
#[derive(Default)]
pub struct NoopResolver {
    fqdn: Option<String>,
}

impl Resolver for NoopResolver {
    fn set_fqdn(&mut self, fqdn: &str) {
        self.fqdn = Some(fqdn.to_string());
    }

    fn resolve(&self) -> Option<String> {
        None
    }
}

/// `urn:lo:nsid:<namespace>:<device_id>`.
pub fn client_id(namespace: &str, device_id: &str) -> HString<128> {
    let mut out = HString::new();
    let _ = out.push_str("urn:lo:nsid:");
    let _ = out.push_str(namespace);
    let _ = out.push(':');
    let _ = out.push_str(device_id);
    out
}

/// `printf("%016llx%016llx", hi, lo)`: a 32-hex-character password.
pub fn api_key_password(hi: u64, lo: u64) -> HString<32> {
    let mut out = HString::new();
    let _ = core::fmt::write(&mut out, format_args!("{hi:016x}{lo:016x}"));
    out
}

/// Validate that `key` is exactly 32 hex characters.
pub fn check_api_key(key: &str) -> Result<(), Error> {
    if key.len() == 32 && key.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Error::InvalidApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_matches_urn_form() {
        assert_eq!(client_id("LomSK", "LomDev").as_str(), "urn:lo:nsid:LomSK:LomDev");
    }

    #[test]
    fn password_is_32_lowercase_hex_chars() {
        let pw = api_key_password(0x1234_5678_9abc_def0, 0x0fed_cba9_8765_4321);
        assert_eq!(pw.len(), 32);
        assert_eq!(pw.as_str(), "123456789abcdef00fedcba987654321");
        check_api_key(&pw).unwrap();
    }

    #[test]
    fn check_api_key_rejects_wrong_length_and_non_hex() {
        assert_eq!(check_api_key("abc"), Err(Error::InvalidApiKey));
        assert_eq!(
            check_api_key("gggggggggggggggggggggggggggggg1"),
            Err(Error::InvalidApiKey)
        );
        assert!(check_api_key("00112233445566778899aabbccddeeff").is_ok());
    }
}
