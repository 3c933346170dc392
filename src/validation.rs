use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::models::{NewServer, Server, ServerPatch};

pub const MAX_NAME_LEN: usize = 50;

// Dotted-quad literals only. Hostnames and IPv6 are rejected on purpose.
static IPV4_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap_or_else(|e| panic!("invalid host pattern: {e}"))
});

pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(name.to_string())
}

pub fn validate_host(ip: &str) -> Result<String, ValidationError> {
    let ip = ip.trim();
    if !IPV4_LITERAL.is_match(ip) {
        return Err(ValidationError::InvalidHost(ip.to_string()));
    }
    Ok(ip.to_string())
}

pub fn validate_port(port: u32) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(ValidationError::InvalidPort),
    }
}

/// Validated `(name, ip, port)` for a new server.
pub fn validate_new(input: &NewServer) -> Result<(String, String, u16), ValidationError> {
    Ok((
        validate_name(&input.name)?,
        validate_host(&input.ip)?,
        validate_port(input.port)?,
    ))
}

/// Applies the editable fields of `patch` to a copy of `server`, validating
/// each supplied field. Identity, selection and probe fields are carried over.
pub fn merge_patch(server: &Server, patch: &ServerPatch) -> Result<Server, ValidationError> {
    let mut merged = server.clone();
    if let Some(name) = &patch.name {
        merged.name = validate_name(name)?;
    }
    if let Some(ip) = &patch.ip {
        merged.ip = validate_host(ip)?;
    }
    if let Some(port) = patch.port {
        merged.port = validate_port(port)?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_server, ServerStatus};

    #[test]
    fn host_accepts_dotted_quads_only() {
        assert!(validate_host("192.168.1.50").is_ok());
        assert!(validate_host(" 10.0.0.1 ").is_ok());
        assert!(validate_host("admin.local").is_err());
        assert!(validate_host("::1").is_err());
        assert!(validate_host("10.0.0").is_err());
        assert!(validate_host("1.2.3.4.5").is_err());
    }

    #[test]
    fn name_is_trimmed_and_capped() {
        assert_eq!(validate_name("  Edge-1 ").unwrap(), "Edge-1");
        assert_eq!(validate_name("   "), Err(ValidationError::EmptyName));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            validate_name(&long),
            Err(ValidationError::NameTooLong { max: MAX_NAME_LEN })
        );
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn port_range() {
        assert_eq!(validate_port(0), Err(ValidationError::InvalidPort));
        assert_eq!(validate_port(1), Ok(1));
        assert_eq!(validate_port(65535), Ok(65535));
        assert_eq!(validate_port(65536), Err(ValidationError::InvalidPort));
    }

    #[test]
    fn merge_keeps_selection_and_probe_fields() {
        let mut server = default_server();
        server.status = ServerStatus::Online;
        let patch = ServerPatch {
            port: Some(9090),
            ..Default::default()
        };
        let merged = merge_patch(&server, &patch).unwrap();
        assert_eq!(merged.port, 9090);
        assert!(merged.active);
        assert_eq!(merged.status, ServerStatus::Online);
        assert_eq!(merged.name, server.name);
    }

    #[test]
    fn merge_rejects_bad_field() {
        let server = default_server();
        let patch = ServerPatch {
            ip: Some("example.com".into()),
            ..Default::default()
        };
        assert!(merge_patch(&server, &patch).is_err());
    }
}
