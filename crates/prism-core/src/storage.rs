//! Shared per-task scratch storage.
//!
//! Pipeline stages running on different workers exchange files through a
//! shared directory tree keyed by task id. Destroyed only by an explicit
//! `cleanup`, never implicitly.

use std::path::{Path, PathBuf};

use crate::domain::TaskId;

#[derive(Debug, Clone)]
pub struct TaskStorage {
    root: PathBuf,
}

impl TaskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The task's directory, created on first use.
    pub fn task_dir(&self, task_id: TaskId) -> std::io::Result<PathBuf> {
        let dir = self.root.join(task_id.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn file_path(&self, task_id: TaskId, filename: &str) -> std::io::Result<PathBuf> {
        Ok(self.task_dir(task_id)?.join(filename))
    }

    pub fn save(&self, task_id: TaskId, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.file_path(task_id, filename)?;
        std::fs::write(&path, data)?;
        Ok(path)
    }

    pub fn load(&self, task_id: TaskId, filename: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.file_path(task_id, filename)?)
    }

    /// Remove the task directory and everything in it. Missing directory is
    /// fine: a task may never have touched storage.
    pub fn cleanup(&self, task_id: TaskId) -> std::io::Result<()> {
        let dir = self.root.join(task_id.to_string());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = TaskStorage::new(tmp.path());
        let id = TaskId::generate();

        let path = storage.save(id, "input.jpg", b"jpeg bytes").unwrap();
        assert!(path.exists());
        assert_eq!(storage.load(id, "input.jpg").unwrap(), b"jpeg bytes");

        storage.cleanup(id).unwrap();
        assert!(!path.exists());

        // Cleaning a task that never stored anything is fine.
        storage.cleanup(TaskId::generate()).unwrap();
    }

    #[test]
    fn tasks_get_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = TaskStorage::new(tmp.path());
        let a = TaskId::generate();
        let b = TaskId::generate();

        storage.save(a, "result.jpg", b"a").unwrap();
        storage.save(b, "result.jpg", b"b").unwrap();

        assert_eq!(storage.load(a, "result.jpg").unwrap(), b"a");
        assert_eq!(storage.load(b, "result.jpg").unwrap(), b"b");
    }
}
