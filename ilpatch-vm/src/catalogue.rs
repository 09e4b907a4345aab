//! The catalogue of patched methods and its loader.
//!
//! Loading is two-phase. A [`CatalogueBuilder`] collects descriptors while
//! the manifest and its files are fetched; [`CatalogueBuilder::finish`]
//! turns it into an immutable [`Catalogue`], the only type that answers
//! lookups. [`Loader::spawn`] runs the fetch on a background thread and
//! [`LoadHandle::wait`] is the single point where the result appears.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use ilpatch_file::{Manifest, MethodDescriptor, Signature, content_key, verify_content_key};
use parking_lot::RwLock;

use crate::error::{Error, Result};

pub const DEFAULT_MANIFEST: &str = "catalogue.json";

/// Ready catalogue: canonical signature to descriptor.
#[derive(Debug, Default)]
pub struct Catalogue {
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl Catalogue {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> CatalogueBuilder {
        CatalogueBuilder::new()
    }

    pub fn get(&self, signature: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.get(signature)
    }

    pub fn lookup(&self, signature: &Signature) -> Option<Arc<MethodDescriptor>> {
        self.get(&signature.to_string()).cloned()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.methods.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Signatures in sorted order.
    pub fn signatures(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.methods.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<MethodDescriptor>)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A catalogue under construction.
#[derive(Debug, Default)]
pub struct CatalogueBuilder {
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl CatalogueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor under its own name. Signatures are unique.
    pub fn insert(&mut self, descriptor: MethodDescriptor) -> Result<&mut Self> {
        let key = descriptor.name.to_string();
        if self.methods.contains_key(&key) {
            return Err(Error::DuplicateSignature(key));
        }
        log::debug!(
            "catalogued {key} ({} instructions)",
            descriptor.body.instructions.len()
        );
        self.methods.insert(key, Arc::new(descriptor));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn finish(self) -> Catalogue {
        Catalogue {
            methods: self.methods,
        }
    }
}

/// Holder of the current catalogue, replaced whole on reload.
#[derive(Debug)]
pub struct CatalogueCell {
    current: RwLock<Arc<Catalogue>>,
}

impl CatalogueCell {
    pub fn new(catalogue: Catalogue) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalogue)),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalogue> {
        self.current.read().clone()
    }

    pub fn swap(&self, next: Catalogue) -> Arc<Catalogue> {
        let count = next.len();
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(next));
        log::info!(
            "catalogue swapped: {} -> {count} patched methods",
            previous.len()
        );
        previous
    }
}

/// Where manifest and descriptor files come from.
pub trait DescriptorSource: Send {
    /// Fetch a file by name: the manifest, or `<key>.json`.
    fn fetch(&mut self, name: &str) -> Result<Vec<u8>>;
}

/// Files under a local directory.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `descriptor` as `<key>.json` and record it in the default
    /// manifest, creating either as needed. Returns the content key.
    pub fn publish(&self, descriptor: &MethodDescriptor) -> Result<String> {
        let io = |path: &Path, e: std::io::Error| Error::Load(format!("{}: {e}", path.display()));
        let json = descriptor.to_json()?;
        let key = content_key(json.as_bytes());
        let file = self.root.join(format!("{key}.json"));
        std::fs::write(&file, &json).map_err(|e| io(&file, e))?;

        let manifest_path = self.root.join(DEFAULT_MANIFEST);
        let mut manifest = match std::fs::read(&manifest_path) {
            Ok(bytes) => Manifest::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::new(),
            Err(e) => return Err(io(&manifest_path, e)),
        };
        manifest.insert(&descriptor.name, key.clone());
        std::fs::write(&manifest_path, manifest.to_json()?).map_err(|e| io(&manifest_path, e))?;
        Ok(key)
    }
}

impl DescriptorSource for DirSource {
    fn fetch(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut components = Path::new(name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::Load(format!(
                "'{name}' is not a file name under {}",
                self.root.display()
            )));
        }
        let path = self.root.join(name);
        std::fs::read(&path).map_err(|e| Error::Load(format!("{}: {e}", path.display())))
    }
}

/// In-memory files, for embedding and tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
    manifest: Manifest,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(name.into(), bytes.into());
        self
    }

    /// Store `descriptor` under its content key and list it in the default
    /// manifest. Returns the key.
    pub fn publish(&mut self, descriptor: &MethodDescriptor) -> Result<String> {
        let json = descriptor.to_json()?;
        let key = content_key(json.as_bytes());
        self.files.insert(format!("{key}.json"), json.into_bytes());
        self.manifest.insert(&descriptor.name, key.clone());
        let manifest = self.manifest.to_json()?;
        self.files.insert(DEFAULT_MANIFEST.to_string(), manifest.into_bytes());
        Ok(key)
    }
}

impl DescriptorSource for MemorySource {
    fn fetch(&mut self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Load(format!("{name}: no such file")))
    }
}

#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Name of the manifest file within the source.
    pub manifest_name: String,
    /// Check each descriptor file against its content key.
    pub verify_content_keys: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            manifest_name: DEFAULT_MANIFEST.to_string(),
            verify_content_keys: false,
        }
    }
}

/// File name of the descriptor published under `key`. Keys are bare
/// names: ASCII letters, digits, `-` and `_`.
fn descriptor_file(key: &str) -> std::result::Result<String, String> {
    if key.is_empty() {
        return Err("empty content key".into());
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(format!("content key '{key}' is not a plain file name"));
    }
    Ok(format!("{key}.json"))
}

/// Fetch the manifest, then every descriptor it lists.
pub fn load(source: &mut dyn DescriptorSource, options: &LoadOptions) -> Result<Catalogue> {
    let manifest_name = &options.manifest_name;
    let manifest = Manifest::from_slice(&source.fetch(manifest_name)?)
        .map_err(|e| Error::Load(format!("{manifest_name}: {e}")))?;

    let mut builder = CatalogueBuilder::new();
    for entry in manifest.entries()? {
        if entry.had_return_type {
            log::warn!(
                "{manifest_name}: key for {} carries a return type",
                entry.signature
            );
        }
        let file = descriptor_file(&entry.key)
            .map_err(|reason| Error::Load(format!("{manifest_name}: {}: {reason}", entry.signature)))?;
        let bytes = source.fetch(&file)?;
        if options.verify_content_keys {
            verify_content_key(&entry.key, &bytes)
                .map_err(|e| Error::Load(format!("{file}: {e}")))?;
        }
        let descriptor =
            MethodDescriptor::from_slice(&bytes).map_err(|e| Error::Load(format!("{file}: {e}")))?;
        if descriptor.name != entry.signature {
            return Err(Error::Load(format!(
                "{file}: descriptor is for {} but the manifest lists {}",
                descriptor.name, entry.signature
            )));
        }
        builder.insert(descriptor)?;
    }
    let catalogue = builder.finish();
    log::info!("catalogue ready: {} patched methods", catalogue.len());
    Ok(catalogue)
}

/// Runs [`load`] off the calling thread.
#[derive(Clone, Debug, Default)]
pub struct Loader {
    options: LoadOptions,
}

impl Loader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn spawn<S>(&self, mut source: S) -> Result<LoadHandle>
    where
        S: DescriptorSource + 'static,
    {
        let options = self.options.clone();
        let handle = std::thread::Builder::new()
            .name("ilpatch-loader".into())
            .spawn(move || load(&mut source, &options))
            .map_err(|e| Error::Load(format!("cannot start loader thread: {e}")))?;
        Ok(LoadHandle { handle })
    }
}

/// A load in progress.
#[derive(Debug)]
pub struct LoadHandle {
    handle: JoinHandle<Result<Catalogue>>,
}

impl LoadHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the load completes.
    pub fn wait(self) -> Result<Catalogue> {
        self.handle
            .join()
            .map_err(|_| Error::Load("loader thread panicked".into()))?
    }
}
