use crate::commandline::CliArgs;
use anyhow::{Context, Result};
use silbms_lib::session::SessionConfig;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "silbms.yaml";

pub fn load(config_file_path: &str) -> Result<SessionConfig> {
    log::debug!("Loading config file from {config_file_path:?}");
    let config_file = std::fs::File::open(config_file_path)
        .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
    let config: SessionConfig = serde_yaml::from_reader(&config_file)
        .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
    Ok(config)
}

/// Session settings from the config file, when present, overridden by commandline flags.
pub fn resolve(args: &CliArgs) -> Result<SessionConfig> {
    let mut config = if Path::new(&args.config_file).exists() {
        load(&args.config_file)?
    } else if args.config_file != DEFAULT_CONFIG_FILE {
        anyhow::bail!("Config file {:?} does not exist", args.config_file);
    } else {
        SessionConfig::default()
    };

    if let Some(device) = &args.device {
        config.device_name = Some(device.clone());
    }
    if args.any_device {
        config.accept_any_device = true;
    }
    if let Some(timeout) = args.timeout {
        config.response_timeout = timeout;
    }
    if let Some(timeout) = args.scan_timeout {
        config.scan_timeout = timeout;
    }
    if let Some(timeout) = args.lock_timeout {
        config.lock_timeout = timeout;
    }
    log::debug!("Session config: {config:?}");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_yaml() {
        let file = write_config(
            "device_name: SIL-001-002-003\nscan_timeout: 30s\ndisconnect_poll_interval: 250ms\n",
        );
        let config = load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.device_name.as_deref(), Some("SIL-001-002-003"));
        assert_eq!(config.scan_timeout, Duration::from_secs(30));
        assert_eq!(config.disconnect_poll_interval, Duration::from_millis(250));
        assert_eq!(config.response_timeout, Duration::from_secs(10));
        assert_eq!(config.name_prefix, "SIL-");
    }

    #[test]
    fn load_rejects_bad_duration() {
        let file = write_config("lock_timeout: soon\n");
        assert!(load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn flags_override_file() {
        let file = write_config("device_name: SIL-001-002-003\nresponse_timeout: 10s\n");
        let path = file.path().to_str().unwrap();
        let args = CliArgs::parse_from([
            "silbms",
            "--config-file",
            path,
            "--device",
            "SIL-009-009-009",
            "--timeout",
            "2s",
            "measurements",
        ]);
        let config = resolve(&args).unwrap();
        assert_eq!(config.device_name.as_deref(), Some("SIL-009-009-009"));
        assert_eq!(config.response_timeout, Duration::from_secs(2));
        assert!(!config.accept_any_device);
    }

    #[test]
    fn missing_explicit_file_fails() {
        let args = CliArgs::parse_from([
            "silbms",
            "--config-file",
            "/nonexistent/silbms.yaml",
            "status",
        ]);
        assert!(resolve(&args).is_err());
    }
}
