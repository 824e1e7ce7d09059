//! Directory scanning helpers.

use crate::common::*;

/// List regular files under `dir`, sorted by path.
///
/// With `recursive` set, files in nested directories are included.
pub fn find_files(dir: impl AsRef<Path>, recursive: bool) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    ensure!(dir.is_dir(), "'{}' is not a directory", dir.display());

    let mut paths: Vec<PathBuf> = if recursive {
        let pattern = dir.join("**").join("*");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| format_err!("non-unicode path '{}'", dir.display()))?;
        glob::glob(pattern)?.try_collect()?
    } else {
        fs::read_dir(dir)
            .with_context(|| format!("unable to list '{}'", dir.display()))?
            .map(|entry| entry.map(|entry| entry.path()))
            .try_collect()?
    };
    paths.retain(|path| path.is_file());
    paths.sort();

    Ok(paths)
}

/// List the immediate subdirectories of `dir` as `(name, path)` pairs sorted
/// by name.
pub fn list_subdirs(dir: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>> {
    let dir = dir.as_ref();
    let mut subdirs: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("unable to list '{}'", dir.display()))?
        .map(|entry| -> Result<_> {
            let path = entry?.path();
            if !path.is_dir() {
                return Ok(None);
            }
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| format_err!("non-unicode directory name '{}'", path.display()))?
                .to_owned();
            Ok(Some((name, path)))
        })
        .filter_map(|result| result.transpose())
        .try_collect()?;
    subdirs.sort();

    Ok(subdirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_and_subdirs_are_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("wriggle"))?;
        fs::create_dir_all(root.join("slip").join("nested"))?;
        fs::write(root.join("slip").join("b.gif"), b"")?;
        fs::write(root.join("slip").join("a.gif"), b"")?;
        fs::write(root.join("slip").join("nested").join("c.gif"), b"")?;
        fs::write(root.join("notes.txt"), b"")?;

        let names: Vec<_> = list_subdirs(root)?.into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["slip", "wriggle"]);

        let flat = find_files(root.join("slip"), false)?;
        assert_eq!(
            flat,
            vec![root.join("slip").join("a.gif"), root.join("slip").join("b.gif")]
        );

        let deep = find_files(root, true)?;
        assert_eq!(deep.len(), 4);
        Ok(())
    }

    #[test]
    fn missing_dir_is_an_error() {
        assert!(find_files("/definitely/not/here", false).is_err());
    }
}
