use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use url::Url;

/// Values the config file may provide. Credentials and the release version
/// never live here; they are environment-only.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub api_url: Option<Url>,
    pub storage_policy_id: Option<String>,
    pub app: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    cloudreve_api: Option<Url>,
    cloudreve_email: Option<String>,
    cloudreve_password: Option<String>,
    cloudreve_storage_policy_id: Option<String>,
    cloudreve_app: Option<String>,
    version: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub api_url: Url,
    pub email: String,
    pub password: String,
    pub storage_policy_id: String,
    pub app: String,
    pub version: String,
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let api_url = override_config
        .cloudreve_api
        .or(base.api_url)
        .ok_or(anyhow!("No Cloudreve API base URL provided"))?;

    let email = override_config
        .cloudreve_email
        .ok_or(anyhow!("No Cloudreve account email provided"))?;

    let password = override_config
        .cloudreve_password
        .ok_or(anyhow!("No Cloudreve account password provided"))?;

    let storage_policy_id = override_config
        .cloudreve_storage_policy_id
        .or(base.storage_policy_id)
        .ok_or(anyhow!("No storage policy id provided"))?;

    let app = override_config
        .cloudreve_app
        .or(base.app)
        .ok_or(anyhow!("No application name provided"))?;

    let version = override_config
        .version
        .ok_or(anyhow!("No release version provided"))?;

    Ok(Config {
        api_url,
        email,
        password,
        storage_policy_id,
        app,
        version,
    })
}

fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "revup", "revup")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config_file() -> Result<ConfigFile> {
    if let Ok(contents) = fs::read_to_string(config_file_path()?) {
        Ok(toml::from_str(&contents)?)
    } else {
        Ok(ConfigFile::default())
    }
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    merge_config(read_config_file()?, env_config)
}

pub fn write_config(config: ConfigFile) -> Result<()> {
    let path = config_file_path()?;
    let parent = path.parent().context("Config path has no parent directory")?;
    fs::create_dir_all(parent)?;
    fs::write(&path, toml::to_string_pretty(&config)?)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}
