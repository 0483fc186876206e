//! The filesystem Promise surface (§4.7): read, write, stat, listDir, copy, move,
//! remove, makeDir, chmod, symlink, readlink, chown, access. Each factory returns a
//! pending [`Promise`] and submits the blocking call via `run_on_loop`; the reactor's
//! default work model here is loop-thread execution (§4.7's retained, not redesigned,
//! contract — these calls are short enough that true background execution isn't worth
//! the complexity).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::bridge;
use crate::error::RuntimeError;
use crate::evaluator::Value;
use crate::promise::Promise;

fn submit<F>(op: F) -> Arc<Promise>
where
    F: FnOnce() -> Result<Value, RuntimeError> + Send + 'static,
{
    let promise = Promise::new();
    let settle = Arc::clone(&promise);
    bridge::run_on_loop(move || match op() {
        Ok(value) => settle.fulfill(value),
        Err(err) => settle.reject(Value::from(err)),
    });
    promise
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> RuntimeError {
    RuntimeError::Io(format!("{context} {}: {e}", path.display()))
}

#[must_use]
pub fn read_file(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || std::fs::read(&path).map(Value::Buffer).map_err(|e| io_err("read", &path, e)))
}

#[must_use]
pub fn write_file(path: impl AsRef<Path>, contents: Vec<u8>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || std::fs::write(&path, &contents).map(|()| Value::Undefined).map_err(|e| io_err("write", &path, e)))
}

#[must_use]
pub fn stat(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        let meta = std::fs::metadata(&path).map_err(|e| io_err("stat", &path, e))?;
        Ok(Value::Array(vec![
            Value::Number(meta.len() as f64),
            Value::Bool(meta.is_dir()),
            Value::Bool(meta.is_file()),
            Value::Bool(meta.file_type().is_symlink()),
        ]))
    })
}

#[must_use]
pub fn list_dir(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        let entries = std::fs::read_dir(&path).map_err(|e| io_err("listDir", &path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err("listDir", &path, e))?;
            names.push(Value::Str(entry.file_name().to_string_lossy().into_owned()));
        }
        Ok(Value::Array(names))
    })
}

#[must_use]
pub fn copy(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Arc<Promise> {
    let from = from.as_ref().to_path_buf();
    let to = to.as_ref().to_path_buf();
    submit(move || std::fs::copy(&from, &to).map(|_| Value::Undefined).map_err(|e| io_err("copy", &from, e)))
}

#[must_use]
pub fn move_path(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Arc<Promise> {
    let from = from.as_ref().to_path_buf();
    let to = to.as_ref().to_path_buf();
    submit(move || std::fs::rename(&from, &to).map(|()| Value::Undefined).map_err(|e| io_err("move", &from, e)))
}

#[must_use]
pub fn remove(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        let meta = std::fs::symlink_metadata(&path).map_err(|e| io_err("remove", &path, e))?;
        let result = if meta.is_dir() { std::fs::remove_dir_all(&path) } else { std::fs::remove_file(&path) };
        result.map(|()| Value::Undefined).map_err(|e| io_err("remove", &path, e))
    })
}

#[must_use]
pub fn make_dir(path: impl AsRef<Path>, recursive: bool) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        let result = if recursive { std::fs::create_dir_all(&path) } else { std::fs::create_dir(&path) };
        result.map(|()| Value::Undefined).map_err(|e| io_err("makeDir", &path, e))
    })
}

#[cfg(unix)]
#[must_use]
pub fn chmod(path: impl AsRef<Path>, mode: u32) -> Arc<Promise> {
    use std::os::unix::fs::PermissionsExt;
    let path = path.as_ref().to_path_buf();
    submit(move || {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map(|()| Value::Undefined)
            .map_err(|e| io_err("chmod", &path, e))
    })
}

#[must_use]
pub fn symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> Arc<Promise> {
    let target = target.as_ref().to_path_buf();
    let link = link.as_ref().to_path_buf();
    submit(move || {
        #[cfg(unix)]
        let result = std::os::unix::fs::symlink(&target, &link);
        #[cfg(not(unix))]
        let result: std::io::Result<()> = Err(std::io::Error::other("symlink is unix-only"));
        result.map(|()| Value::Undefined).map_err(|e| io_err("symlink", &link, e))
    })
}

#[must_use]
pub fn read_link(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        std::fs::read_link(&path)
            .map(|target: PathBuf| Value::Str(target.to_string_lossy().into_owned()))
            .map_err(|e| io_err("readlink", &path, e))
    })
}

#[cfg(unix)]
#[must_use]
pub fn chown(path: impl AsRef<Path>, uid: u32, gid: u32) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || {
        nix::unistd::chown(&path, Some(nix::unistd::Uid::from_raw(uid)), Some(nix::unistd::Gid::from_raw(gid)))
            .map(|()| Value::Undefined)
            .map_err(|e| RuntimeError::Io(format!("chown {}: {e}", path.display())))
    })
}

#[must_use]
pub fn access(path: impl AsRef<Path>) -> Arc<Promise> {
    let path = path.as_ref().to_path_buf();
    submit(move || Ok(Value::Bool(path.exists())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::Scheduler;

    fn run_to_settled(promise: &Arc<Promise>) {
        let scheduler = Arc::new(Scheduler::new());
        bridge::unregister();
        bridge::register(Arc::clone(&scheduler), Arc::new(|thunk| thunk()), Arc::new(|_payload| {}));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !promise.is_settled() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        bridge::unregister();
    }

    #[test]
    fn write_then_read_round_trips_file_contents() {
        let dir = std::env::temp_dir().join(format!("swazi-runtime-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("greeting.txt");

        let write_promise = write_file(&file, b"hello runtime".to_vec());
        run_to_settled(&write_promise);
        assert!(write_promise.is_settled());

        let contents = std::fs::read(&file).unwrap();
        assert_eq!(contents, b"hello runtime");

        let read_promise = read_file(&file);
        run_to_settled(&read_promise);
        assert!(read_promise.is_settled());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn access_reports_whether_a_path_exists() {
        let promise = access("/definitely/does/not/exist/swazi");
        run_to_settled(&promise);
        assert!(promise.is_settled());
    }
}
