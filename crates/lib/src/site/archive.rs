//! Packaging site output into size-bounded archive parts.
//!
//! Parts are named `part0.zip`, `part1.zip`, ... The built-in zip archiver
//! reports how many parts it wrote. An external archive command reports
//! nothing, so its parts are found by probing consecutive names until one is
//! missing. That probe breaks silently if the naming scheme ever changes;
//! prefer the built-in archiver.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::site::build::run_command;
use crate::site::types::BuildToolError;
use crate::util::hash::relative_files_excluding;

pub fn part_name(index: usize) -> String {
  format!("part{index}.zip")
}

/// How site output gets archived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Archiver {
  #[default]
  Zip,
  /// Run through the shell with `SOURCE_DIR`, `OUT_DIR` and `PART_SIZE` set.
  Command(String),
}

impl Archiver {
  /// Archive `source` into `out_dir`, returning the part paths in order.
  /// The built-in archiver leaves out everything under `exclude`.
  pub async fn archive(
    &self,
    source: &Path,
    out_dir: &Path,
    exclude: Option<&Path>,
    part_size: u64,
  ) -> Result<Vec<PathBuf>, BuildToolError> {
    fs::create_dir_all(out_dir).map_err(BuildToolError::io("create archive directory"))?;

    let count = match self {
      Archiver::Zip => Some(zip_parts(source, out_dir, exclude, part_size)?),
      Archiver::Command(cmd) => {
        let env = BTreeMap::from([
          ("SOURCE_DIR".to_string(), source.display().to_string()),
          ("OUT_DIR".to_string(), out_dir.display().to_string()),
          ("PART_SIZE".to_string(), part_size.to_string()),
        ]);
        run_command(cmd, source, &env, None).await?;
        None
      }
    };

    let parts = match count {
      Some(count) => (0..count).map(|i| out_dir.join(part_name(i))).collect(),
      None => discover_parts(out_dir),
    };
    info!(source = %source.display(), parts = parts.len(), "archived");
    Ok(parts)
  }
}

/// Probe `part0.zip`, `part1.zip`, ... and stop at the first missing one.
pub fn discover_parts(dir: &Path) -> Vec<PathBuf> {
  (0..)
    .map(|i| dir.join(part_name(i)))
    .take_while(|path| path.exists())
    .collect()
}

/// Zip every file under `source`, starting a new part whenever adding a file
/// would push the current part's uncompressed size past `part_size`. A file
/// larger than `part_size` gets a part of its own. Always writes at least one
/// part. Returns the number of parts.
///
/// Files under `exclude` are skipped, so an output directory nested in the
/// site never ends up in its own archive.
pub fn zip_parts(source: &Path, out_dir: &Path, exclude: Option<&Path>, part_size: u64) -> Result<usize, BuildToolError> {
  let files = relative_files_excluding(source, exclude)?;
  let options = SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(zip::DateTime::default());

  let open_part = |index: usize| -> Result<ZipWriter<BufWriter<File>>, BuildToolError> {
    let file = File::create(out_dir.join(part_name(index))).map_err(BuildToolError::io("create archive part"))?;
    Ok(ZipWriter::new(BufWriter::new(file)))
  };

  let mut index = 0;
  let mut writer = open_part(index)?;
  let mut current_size = 0u64;
  let mut current_entries = 0usize;

  for relative in files {
    let path = source.join(&relative);
    let size = fs::metadata(&path).map_err(BuildToolError::io("read archive input"))?.len();

    if current_entries > 0 && current_size + size > part_size {
      writer.finish()?;
      index += 1;
      writer = open_part(index)?;
      current_size = 0;
      current_entries = 0;
    }

    writer.start_file(relative.as_str(), options)?;
    let mut input = File::open(&path).map_err(BuildToolError::io("read archive input"))?;
    io::copy(&mut input, &mut writer).map_err(BuildToolError::io("write archive part"))?;
    debug!(file = %relative, part = index, "archived file");

    current_size += size;
    current_entries += 1;
  }
  writer.finish()?;

  Ok(index + 1)
}
