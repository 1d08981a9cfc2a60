//! Atomic-directory discipline shared by archive extraction (§4.4) and
//! venv materialization (§4.6): populate a sibling work directory in
//! full, then rename it into place in one filesystem operation, so a
//! concurrent reader never observes a partially-populated target.
//!
//! Grounded on rustup's own atomic-install pattern in its downloader and
//! toolchain-installation code (a temp/work directory renamed into its
//! final location once complete), generalized here into one reusable
//! primitive both [`crate::archive`] and [`crate::venv`] call.

use std::io;
use std::path::Path;

/// Renames `work_dir` into `dest`, replacing any existing file/empty
/// directory at `dest`. If another process already finished populating
/// `dest` first, `work_dir` is removed and the pre-existing `dest` wins,
/// keeping the rename race benign (first writer to finish, wins).
pub fn populate_then_rename(work_dir: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(work_dir, dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.exists() => {
            let _ = std::fs::remove_dir_all(work_dir);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renames_work_dir_into_place() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("marker"), b"1").unwrap();

        populate_then_rename(&work, &dest).unwrap();
        assert!(dest.join("marker").exists());
        assert!(!work.exists());
    }

    #[test]
    fn existing_dest_wins_and_work_dir_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("marker"), b"new").unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("marker"), b"existing").unwrap();

        populate_then_rename(&work, &dest).unwrap();
        let contents = std::fs::read(dest.join("marker")).unwrap();
        assert_eq!(contents, b"existing");
        assert!(!work.exists());
    }
}
