/* Driver configuration files.
 *
 * A config file is a YAML list of drivers to register:
 *
 *   - name: counter
 *     path: /dev/null
 *     args:
 *       - type: uint64
 *         val: 5
 *   - name: can
 *     path: can0
 *     schema: can.yaml
 *
 * Each entry triggers one `register_driver` call; `schema` names a file
 * under the schema base directory. */

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::Hound;
use crate::error::{Error, Result};

/* A typed driver init argument. */
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "val", rename_all = "lowercase")]
pub enum InitArg {
    Float(f32),
    Double(f64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Bytes(Vec<u8>),
}

impl InitArg {
    /* Widening accessors; a type mismatch is a caller error. */

    pub fn as_u64(&self) -> Result<u64> {
        match *self {
            InitArg::Uint8(v) => Ok(u64::from(v)),
            InitArg::Uint16(v) => Ok(u64::from(v)),
            InitArg::Uint32(v) => Ok(u64::from(v)),
            InitArg::Uint64(v) => Ok(v),
            ref other => Err(Error::InvalidVal(format!(
                "expected an unsigned integer argument, got {other:?}"
            ))),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            InitArg::Int8(v) => Ok(i64::from(v)),
            InitArg::Int16(v) => Ok(i64::from(v)),
            InitArg::Int32(v) => Ok(i64::from(v)),
            InitArg::Int64(v) => Ok(v),
            ref other => Err(Error::InvalidVal(format!(
                "expected a signed integer argument, got {other:?}"
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match *self {
            InitArg::Float(v) => Ok(f64::from(v)),
            InitArg::Double(v) => Ok(v),
            ref other => Err(Error::InvalidVal(format!(
                "expected a floating point argument, got {other:?}"
            ))),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            InitArg::Bytes(v) => Ok(v),
            other => Err(Error::InvalidVal(format!(
                "expected a bytes argument, got {other:?}"
            ))),
        }
    }
}

/* One config entry: driver kind, device path, optional schema file and
 * init arguments. */
#[derive(Debug, Clone, Deserialize)]
pub struct DriverSpec {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub args: Vec<InitArg>,
}

pub fn parse_config(text: &str) -> Result<Vec<DriverSpec>> {
    Ok(serde_yaml::from_str(text)?)
}

pub fn load_config(path: &Path) -> Result<Vec<DriverSpec>> {
    let text = fs::read_to_string(path)?;
    parse_config(&text)
}

/* Register every driver a config file names. Fails on the first entry
 * that does not register; earlier registrations are kept. */
pub async fn apply_config(
    hound: &Hound,
    specs: &[DriverSpec],
    schema_base: Option<&Path>,
) -> Result<()> {
    for spec in specs {
        let kind = spec.name.parse()?;
        hound
            .register_driver(kind, &spec.path, schema_base, spec.schema.as_deref(), &spec.args)
            .await?;
        info!("registered {} driver at {}", spec.name, spec.path.display());
    }
    Ok(())
}
