use std::fs;

use crate::config::Config;

pub fn read_config(filename: &str) -> Result<Config, String> {
    let text = fs::read_to_string(filename)
        .map_err(|err| format!("Failed to read config file '{}': {}", filename, err))?;

    let data: Config = serde_yaml::from_str(&text)
        .map_err(|err| format!("Could not parse YAML file '{}': {}", filename, err))?;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_config_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  cert_file: c.pem
  key_file: k.pem
backend_groups:
  - name: web
    targets:
      - url: http://127.0.0.1:9000
"#
        )
        .unwrap();

        let cfg = read_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.backend_groups.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_config("/nonexistent/proxy.yaml").unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
