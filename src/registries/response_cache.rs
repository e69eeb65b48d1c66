use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

use crate::data::{CompletionService, ResponseCache, ServiceError};

/// File-backed implementation of the [`ResponseCache`] trait.
///
/// Entries live under `{folder}/{scope_hash}/{key}.json`, where the scope
/// hash groups all entries produced with the same model so switching models
/// never serves stale answers.
#[derive(Debug, Clone)]
pub struct PromptCache {
    /// Root folder for cache artifacts (defaults to ".tagsmith").
    folder: String,
    /// Hash of the model name, used as the subfolder.
    scope_hash: String,
}

impl PromptCache {
    pub fn new(folder: Option<String>, scope: &str) -> Self {
        Self {
            folder: folder.unwrap_or_else(|| ".tagsmith".to_string()),
            scope_hash: sha256_hex(scope),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut path = PathBuf::from(&self.folder);
        path.push(&self.scope_hash);
        path.push(format!("{}.json", key));
        path
    }

    fn entry_dir(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.folder);
        path.push(&self.scope_hash);
        path
    }
}

impl ResponseCache for PromptCache {
    fn get(&self, key: &str) -> Option<String> {
        // File not found or read error is a cache miss.
        fs::read_to_string(self.entry_path(key)).ok()
    }

    fn put(&self, key: &str, value: &str) {
        let dir = self.entry_dir();
        if let Err(e) = fs::create_dir_all(&dir) {
            eprintln!("Failed to create cache directory {:?}: {}", dir, e);
            return;
        }

        let path = self.entry_path(key);
        if let Err(e) = fs::write(&path, value) {
            eprintln!("Failed to write cache file {:?}: {}", path, e);
        }
    }
}

/// Wraps a [`CompletionService`] with a prompt-keyed cache, so repeated
/// runs over the same repository replay earlier answers instead of paying
/// for them again. Only successful completions are stored.
pub struct CachedCompletion<S> {
    inner: S,
    cache: PromptCache,
}

impl<S: CompletionService> CachedCompletion<S> {
    pub fn new(inner: S, cache: PromptCache) -> Self {
        Self { inner, cache }
    }
}

impl<S: CompletionService> CompletionService for CachedCompletion<S> {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let key = sha256_hex(prompt);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let response = self.inner.complete(prompt)?;
        self.cache.put(&key, &response);
        Ok(response)
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
