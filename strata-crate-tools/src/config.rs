use anyhow::Context;
use serde::{Serialize, de::DeserializeOwned};
use std::fs;
use std::path::Path;

/// 从 TOML 文件加载配置
pub fn load_toml<T, P>(path: P) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

    parse_toml(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
}

/// 从 TOML 字符串解析配置
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> anyhow::Result<T> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// 保存配置到 TOML 文件
pub fn save_toml<T, P>(value: &T, path: P) -> anyhow::Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let content = toml::to_string_pretty(value).context("序列化配置失败")?;

    fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn test_parse_toml_with_default_field() {
        let sample: Sample = parse_toml("name = \"swap\"").unwrap();
        assert_eq!(sample, Sample { name: "swap".to_string(), count: 0 });
    }

    #[test]
    fn test_parse_toml_reports_error() {
        let result = parse_toml::<Sample>("count = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_toml() {
        let path = std::env::temp_dir().join(format!("strata-config-test-{}.toml", std::process::id()));
        let sample = Sample { name: "frames".to_string(), count: 3 };
        save_toml(&sample, &path).unwrap();

        let loaded: Sample = load_toml(&path).unwrap();
        assert_eq!(loaded, sample);
        let _ = fs::remove_file(&path);
    }
}
