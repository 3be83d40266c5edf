use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::XnatcError;

/// Extracts every file entry of an archive resource zip directly into
/// `target_dir`, dropping the `<experiment>/scans/.../files/` prefix XNAT
/// puts in front of each name. Returns the written file names.
pub fn extract_zip_flat(zip_path: &Path, target_dir: &Path) -> Result<Vec<String>, XnatcError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        XnatcError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    fs::create_dir_all(target_dir).map_err(|err| XnatcError::Filesystem(err.to_string()))?;

    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = match entry
            .enclosed_name()
            .and_then(|path| path.file_name().map(|name| name.to_owned()))
        {
            Some(name) => name,
            None => {
                return Err(XnatcError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        let mut outfile = fs::File::create(target_dir.join(&name))
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        names.push(name.to_string_lossy().into_owned());
    }
    Ok(names)
}
