//! Catalogued, quota-bounded, pin-aware storage of versioned model assets

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use waive_core::{is_valid_identifier, is_within_directory, sanitize_path_component, Result, WaiveError};

pub const DEFAULT_QUOTA_BYTES: u64 = 256 * 1024 * 1024;
pub const MIN_QUOTA_BYTES: u64 = 64 * 1024;
pub const MAX_QUOTA_BYTES: u64 = 8 * 1024 * 1024 * 1024;

pub const SETTINGS_FILE: &str = "model_manager_settings.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const PAYLOAD_FILE: &str = "model.bin";

const PLACEHOLDER_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCatalogEntry {
    pub model_id: String,
    pub display_name: String,
    pub description: String,
    pub available_versions: Vec<String>,
    pub default_version: String,
    pub install_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledModelInfo {
    pub model_id: String,
    pub display_name: String,
    pub version: String,
    pub install_directory: PathBuf,
    pub size_bytes: u64,
    pub pinned: bool,
}

/// Models shipped with the application
pub fn builtin_catalog() -> Vec<ModelCatalogEntry> {
    vec![
        ModelCatalogEntry {
            model_id: "stem_separator".into(),
            display_name: "Stem Separator".into(),
            description: "Offline deterministic source separation model.".into(),
            available_versions: vec!["1.0.0".into(), "1.1.0".into()],
            default_version: "1.1.0".into(),
            install_size_bytes: 256 * 1024,
        },
        ModelCatalogEntry {
            model_id: "auto_mix_suggester".into(),
            display_name: "Auto-Mix Suggester".into(),
            description: "Track balancing and stereo placement suggestion model.".into(),
            available_versions: vec!["1.0.0".into()],
            default_version: "1.0.0".into(),
            install_size_bytes: 128 * 1024,
        },
    ]
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSettings {
    #[serde(default)]
    quota_bytes: u64,
    #[serde(default)]
    pinned_versions: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelManifest {
    model_id: String,
    display_name: String,
    version: String,
    size_bytes: u64,
    installed_at_utc: String,
}

struct StoreState {
    storage_dir: PathBuf,
    quota_bytes: u64,
    pinned: BTreeMap<String, String>,
}

impl StoreState {
    fn load(storage_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&storage_dir)?;
        let settings: StoreSettings = fs::read_to_string(storage_dir.join(SETTINGS_FILE))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let quota_bytes = match settings.quota_bytes {
            0 => DEFAULT_QUOTA_BYTES,
            q => q.max(MIN_QUOTA_BYTES),
        };
        Ok(Self {
            storage_dir,
            quota_bytes,
            pinned: settings.pinned_versions,
        })
    }

    fn settings_json(&self, pinned: &BTreeMap<String, String>) -> Result<String> {
        let settings = StoreSettings {
            quota_bytes: self.quota_bytes,
            pinned_versions: pinned.clone(),
        };
        Ok(serde_json::to_string_pretty(&settings)?)
    }

    fn save(&self) -> Result<()> {
        let json = self.settings_json(&self.pinned)?;
        fs::write(self.storage_dir.join(SETTINGS_FILE), json)?;
        Ok(())
    }

    fn version_dir(&self, model_id: &str, version: &str) -> PathBuf {
        self.storage_dir.join(model_id).join(version)
    }

    fn is_installed(&self, model_id: &str, version: &str) -> bool {
        self.version_dir(model_id, version).join(MANIFEST_FILE).is_file()
    }

    fn usage_bytes(&self) -> u64 {
        directory_size(&self.storage_dir)
    }

    fn installed_info(&self, model_id: &str, version: &str) -> InstalledModelInfo {
        let install_directory = self.version_dir(model_id, version);
        InstalledModelInfo {
            model_id: model_id.to_string(),
            display_name: catalog_entry(model_id)
                .map(|e| e.display_name)
                .unwrap_or_else(|| model_id.to_string()),
            version: version.to_string(),
            size_bytes: directory_size(&install_directory),
            install_directory,
            pinned: self.pinned.get(model_id).is_some_and(|v| v == version),
        }
    }

    /// Installed versions of one model, ascending
    fn installed_versions(&self, model_id: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.storage_dir.join(model_id)) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(MANIFEST_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions
    }

    fn list_installed(&self) -> Vec<InstalledModelInfo> {
        let Ok(entries) = fs::read_dir(&self.storage_dir) else {
            return Vec::new();
        };
        let mut model_ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        model_ids.sort();

        model_ids
            .iter()
            .flat_map(|id| {
                self.installed_versions(id)
                    .into_iter()
                    .map(move |v| (id.clone(), v))
            })
            .map(|(id, v)| self.installed_info(&id, &v))
            .collect()
    }
}

fn catalog_entry(model_id: &str) -> Option<ModelCatalogEntry> {
    builtin_catalog().into_iter().find(|e| e.model_id == model_id)
}

/// Total size of all regular files beneath `dir`
pub fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Order version strings token-wise on `.`. Missing tokens count as `0`.
/// All-digit tokens compare numerically; other tokens compare naturally,
/// with a `-` suffix (pre-release) sorting below the bare token.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let lhs: Vec<&str> = a.split('.').collect();
    let rhs: Vec<&str> = b.split('.').collect();
    let count = lhs.len().max(rhs.len());

    for i in 0..count {
        let l = lhs.get(i).copied().unwrap_or("0");
        let r = rhs.get(i).copied().unwrap_or("0");
        let ord = if is_numeric(l) && is_numeric(r) {
            compare_numeric(l, r)
        } else {
            natural_compare(l, r)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

// Compares digit strings of any length without overflow
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn split_runs(token: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let bytes = token.as_bytes();
    for i in 1..=bytes.len() {
        if i == bytes.len() || bytes[i].is_ascii_digit() != bytes[start].is_ascii_digit() {
            runs.push(&token[start..i]);
            start = i;
        }
    }
    runs
}

fn natural_compare(a: &str, b: &str) -> Ordering {
    let lhs = split_runs(a);
    let rhs = split_runs(b);

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        let ord = if is_numeric(l) && is_numeric(r) {
            compare_numeric(l, r)
        } else {
            l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase())
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match lhs.len().cmp(&rhs.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater if lhs[rhs.len()].starts_with('-') => Ordering::Less,
        Ordering::Less if rhs[lhs.len()].starts_with('-') => Ordering::Greater,
        other => other,
    }
}

fn placeholder_seed(model_id: &str, version: &str) -> u64 {
    let digest = Sha256::digest(format!("{model_id}:{version}").as_bytes());
    u64::from(u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

/// Write exactly `size` deterministic bytes to `path`
fn write_placeholder(path: &Path, model_id: &str, version: &str, size: u64) -> Result<()> {
    let seed = placeholder_seed(model_id, version);
    let chunk: Vec<u8> = (0..PLACEHOLDER_CHUNK as u64)
        .map(|i| ((seed + i * 31) & 0xff) as u8)
        .collect();

    let mut out = BufWriter::new(fs::File::create(path)?);
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(PLACEHOLDER_CHUNK as u64) as usize;
        out.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    out.flush()?;
    Ok(())
}

fn checked_component(component: &str) -> Result<&str> {
    if sanitize_path_component(component).is_empty() {
        return Err(WaiveError::InvalidPathComponent(component.to_string()));
    }
    Ok(component)
}

/// Installs, pins and resolves model versions under one storage directory.
///
/// Every public operation holds the store mutex for its whole duration and
/// reads installed state from disk, so edits made outside the process are
/// picked up on the next call.
pub struct ModelStore {
    state: Mutex<StoreState>,
}

impl ModelStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(StoreState::load(storage_dir.into())?),
        })
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn storage_directory(&self) -> PathBuf {
        self.state().storage_dir.clone()
    }

    /// Switch to another storage root and reload its settings
    pub fn set_storage_directory(&self, storage_dir: impl Into<PathBuf>) -> Result<()> {
        let mut state = self.state();
        *state = StoreState::load(storage_dir.into())?;
        info!(path = %state.storage_dir.display(), "Model storage directory changed");
        Ok(())
    }

    pub fn list_catalog(&self) -> Vec<ModelCatalogEntry> {
        builtin_catalog()
    }

    pub fn catalog_entry(&self, model_id: &str) -> Option<ModelCatalogEntry> {
        catalog_entry(model_id)
    }

    pub fn list_installed(&self) -> Vec<InstalledModelInfo> {
        self.state().list_installed()
    }

    pub fn quota_bytes(&self) -> u64 {
        self.state().quota_bytes
    }

    pub fn storage_usage_bytes(&self) -> u64 {
        self.state().usage_bytes()
    }

    /// Set the quota, clamped to [64 KiB, 8 GiB]. Returns the applied value.
    pub fn set_quota_bytes(&self, quota_bytes: u64) -> Result<u64> {
        let mut state = self.state();
        let clamped = quota_bytes.clamp(MIN_QUOTA_BYTES, MAX_QUOTA_BYTES);
        let usage = state.usage_bytes();
        if clamped < usage {
            return Err(WaiveError::QuotaBelowUsage(usage));
        }
        state.quota_bytes = clamped;
        state.save()?;
        info!(quota_bytes = clamped, "Model quota updated");
        Ok(clamped)
    }

    /// Install `model_id` at `version` (catalog default when None).
    /// Installing an existing version is a no-op apart from pinning.
    pub fn install(&self, model_id: &str, version: Option<&str>, pin: bool) -> Result<InstalledModelInfo> {
        if !is_valid_identifier(model_id) {
            return Err(WaiveError::InvalidIdentifier);
        }
        checked_component(model_id)?;
        let entry = catalog_entry(model_id).ok_or_else(|| WaiveError::UnknownModel(model_id.to_string()))?;

        let version = match version.filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => entry.default_version.clone(),
        };
        checked_component(&version)?;
        if !entry.available_versions.contains(&version) {
            return Err(WaiveError::UnsupportedVersion {
                model: model_id.to_string(),
                version,
            });
        }

        let mut state = self.state();
        let target = state.version_dir(model_id, &version);

        if !target.is_dir() {
            let manifest = ModelManifest {
                model_id: model_id.to_string(),
                display_name: entry.display_name.clone(),
                version: version.clone(),
                size_bytes: entry.install_size_bytes,
                installed_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };
            let manifest_json = serde_json::to_string_pretty(&manifest)?;

            // Account for everything the install leaves on disk
            let mut projected = state.usage_bytes() + entry.install_size_bytes + manifest_json.len() as u64;
            if pin {
                let mut pinned = state.pinned.clone();
                pinned.insert(model_id.to_string(), version.clone());
                let current = fs::metadata(state.storage_dir.join(SETTINGS_FILE)).map(|m| m.len()).unwrap_or(0);
                projected = (projected + state.settings_json(&pinned)?.len() as u64).saturating_sub(current);
            }
            if projected > state.quota_bytes {
                warn!(model = model_id, %version, projected, quota = state.quota_bytes, "Model install exceeds quota");
                return Err(WaiveError::OverQuota);
            }

            fs::create_dir_all(&target)?;
            let written = write_placeholder(&target.join(PAYLOAD_FILE), model_id, &version, entry.install_size_bytes)
                .and_then(|_| Ok(fs::write(target.join(MANIFEST_FILE), manifest_json)?));
            if let Err(e) = written {
                let _ = fs::remove_dir_all(&target);
                return Err(e);
            }
            info!(model = model_id, %version, bytes = entry.install_size_bytes, "Model installed");
        }

        if pin {
            state.pinned.insert(model_id.to_string(), version.clone());
            state.save()?;
        }
        Ok(state.installed_info(model_id, &version))
    }

    /// Remove one version, or every version when `version` is None
    pub fn uninstall(&self, model_id: &str, version: Option<&str>) -> Result<()> {
        if !is_valid_identifier(model_id) {
            return Err(WaiveError::InvalidIdentifier);
        }
        checked_component(model_id)?;
        let version = version.filter(|v| !v.is_empty());
        if let Some(v) = version {
            checked_component(v)?;
        }

        let mut state = self.state();
        let base = state.storage_dir.join(model_id);
        if !base.exists() {
            return Ok(());
        }
        let target = match version {
            Some(v) => base.join(v),
            None => base,
        };
        if !target.exists() {
            return Ok(());
        }

        let storage = state.storage_dir.canonicalize()?;
        let inside = is_within_directory(&target, &storage)
            && target.canonicalize().is_ok_and(|t| t != storage);
        if !inside {
            return Err(WaiveError::PathOutsideStorage);
        }

        fs::remove_dir_all(&target)?;
        info!(model = model_id, version = ?version, "Model uninstalled");

        let clear_pin = match version {
            Some(v) => state.pinned.get(model_id).is_some_and(|p| p == v),
            None => true,
        };
        if clear_pin && state.pinned.remove(model_id).is_some() {
            state.save()?;
        }
        Ok(())
    }

    pub fn pin(&self, model_id: &str, version: &str) -> Result<()> {
        if !is_valid_identifier(model_id) {
            return Err(WaiveError::InvalidIdentifier);
        }
        checked_component(version)?;
        let mut state = self.state();
        if !state.is_installed(model_id, version) {
            return Err(WaiveError::NotInstalled);
        }
        state.pinned.insert(model_id.to_string(), version.to_string());
        state.save()
    }

    pub fn unpin(&self, model_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.pinned.remove(model_id).is_some() {
            state.save()?;
        }
        Ok(())
    }

    pub fn pinned_version(&self, model_id: &str) -> Option<String> {
        self.state().pinned.get(model_id).cloned()
    }

    pub fn is_installed(&self, model_id: &str, version: Option<&str>) -> bool {
        let state = self.state();
        match version.filter(|v| !v.is_empty()) {
            Some(v) => !sanitize_path_component(v).is_empty() && state.is_installed(model_id, v),
            None => !state.installed_versions(model_id).is_empty(),
        }
    }

    /// The requested version, else the pinned one, else the newest installed
    pub fn resolve_installed(&self, model_id: &str, requested: Option<&str>) -> Option<InstalledModelInfo> {
        if !is_valid_identifier(model_id) {
            return None;
        }
        let state = self.state();

        let wanted = requested
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| state.pinned.get(model_id).cloned());

        let version = match wanted {
            Some(v) => {
                if sanitize_path_component(&v).is_empty() || !state.is_installed(model_id, &v) {
                    return None;
                }
                v
            }
            None => state.installed_versions(model_id).pop()?,
        };
        Some(state.installed_info(model_id, &version))
    }
}
