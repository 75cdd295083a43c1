//! Directory scanner (§6 "Filesystem"): recursive walk within each subject
//! folder, filtered by extension mode.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Which files count as DICOM instances during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionMode {
    /// Only files ending in exactly `.dcm`.
    OnlyDcmLower,
    /// Only files ending in exactly `.DCM`.
    OnlyDcmUpper,
    /// `.dcm`, `.DCM`, `.Dcm`, etc.
    CaseInsensitiveDcm,
    /// Files with no extension at all.
    NoExtension,
    /// Every regular file, regardless of extension.
    All,
}

impl ExtensionMode {
    fn matches(&self, path: &Path) -> bool {
        match self {
            ExtensionMode::OnlyDcmLower => path.extension().is_some_and(|e| e == "dcm"),
            ExtensionMode::OnlyDcmUpper => path.extension().is_some_and(|e| e == "DCM"),
            ExtensionMode::CaseInsensitiveDcm => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("dcm")),
            ExtensionMode::NoExtension => path.extension().is_none(),
            ExtensionMode::All => true,
        }
    }
}

/// A subject folder discovered immediately under the scan root, with every
/// matching file beneath it (§6: "immediate children are subject folders;
/// recursive walk within each").
#[derive(Debug, Clone)]
pub struct SubjectFolder {
    pub raw_patient_folder: String,
    pub files: Vec<PathBuf>,
}

pub fn scan(root: &Path, mode: ExtensionMode) -> std::io::Result<Vec<SubjectFolder>> {
    let mut folders = Vec::new();

    let immediate_children = std::fs::read_dir(root)?;
    for entry in immediate_children {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let raw_patient_folder = entry.file_name().to_string_lossy().into_owned();

        let mut files = Vec::new();
        for walk_entry in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
            if walk_entry.file_type().is_file() && mode.matches(walk_entry.path()) {
                files.push(walk_entry.path().to_path_buf());
            }
        }
        folders.push(SubjectFolder {
            raw_patient_folder,
            files,
        });
    }

    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn case_insensitive_mode_matches_mixed_case() {
        let path = Path::new("foo.DcM");
        assert!(ExtensionMode::CaseInsensitiveDcm.matches(path));
        assert!(!ExtensionMode::OnlyDcmLower.matches(path));
    }

    #[test]
    fn no_extension_mode_rejects_any_suffix() {
        assert!(ExtensionMode::NoExtension.matches(Path::new("IM0001")));
        assert!(!ExtensionMode::NoExtension.matches(Path::new("IM0001.dcm")));
    }

    #[test]
    fn scan_only_descends_one_level_for_subject_folders() {
        let root = tempfile::tempdir().unwrap();
        let subject_dir = root.path().join("subject-001");
        let nested = subject_dir.join("series1");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.dcm"), b"x").unwrap();
        fs::write(root.path().join("stray.dcm"), b"x").unwrap(); // not under a subject folder

        let folders = scan(root.path(), ExtensionMode::CaseInsensitiveDcm).unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].raw_patient_folder, "subject-001");
        assert_eq!(folders[0].files.len(), 1);
    }
}
