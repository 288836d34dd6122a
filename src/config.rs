use std::{fs, path::Path};

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// shell binary the command runner executes through, defaults to "sh"
    #[serde(default = "default_shell")]
    pub shell: String,
    /// echo every external command and its output at info level
    #[serde(default)]
    pub verbose: bool,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            verbose: false,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str).map_err(|e| crate::EsflowError::Convert(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use crate::Config;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        shell = "bash"
        verbose = true
        "#;
        let config = Config::load_from_str(toml_str).unwrap();
        assert_eq!(config.shell, "bash");
        assert!(config.verbose);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config.shell, "sh");
        assert!(!config.verbose);
    }
}
