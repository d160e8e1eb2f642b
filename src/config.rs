use crate::upload::DEFAULT_MAX_UPLOAD_BYTES;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Server configuration, read from `FILEVAULT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
    pub max_upload_bytes: usize,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("FILEVAULT_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".into()),
            database_path: env::var("FILEVAULT_DATABASE")
                .unwrap_or_else(|_| "filevault.db".into())
                .into(),
            storage_root: env::var("FILEVAULT_STORAGE_ROOT")
                .unwrap_or_else(|_| "uploads".into())
                .into(),
            max_upload_bytes: parse_var("FILEVAULT_MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            bcrypt_cost: parse_var("FILEVAULT_BCRYPT_COST")?.unwrap_or(bcrypt::DEFAULT_COST),
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got {value:?}")),
        Err(_) => Ok(None),
    }
}
