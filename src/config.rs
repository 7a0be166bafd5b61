use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Deserializer};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use crate::detection::{ClassMap, Label};
use crate::geometry::BBox;
use crate::zones::Zone;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tracking {
    pub distance_threshold: f32,
    pub max_history: usize,
    pub max_missing_frames: u64,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            distance_threshold: 80.0,
            max_history: 5,
            max_missing_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryDebounce {
    pub confirmation_window: u64,
    pub confirmation_hits: usize,
}

impl Default for EntryDebounce {
    fn default() -> Self {
        Self {
            confirmation_window: 30,
            confirmation_hits: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub cleaning_timeout: u64,
    pub violation_cooldown: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            cleaning_timeout: 330,
            violation_cooldown: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoiSpec {
    pub id: String,
    pub rect: [i32; 4],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Output {
    pub violations_path: PathBuf,
    pub queue_capacity: usize,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            violations_path: PathBuf::from("results/violations/violations.json"),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub entry: EntryDebounce,
    #[serde(default)]
    pub policy: Policy,

    // TOML table keys are strings; parse "0" = "Hand" into a typed map
    #[serde(default, deserialize_with = "deserialize_classes")]
    pub classes: ClassMap,

    #[serde(default)]
    pub roi: Vec<RoiSpec>,
    #[serde(default)]
    pub output: Output,
}

fn deserialize_classes<'de, D>(de: D) -> std::result::Result<ClassMap, D::Error>
where
    D: Deserializer<'de>,
{
    let table = BTreeMap::<String, String>::deserialize(de)?;
    let mut out = BTreeMap::new();
    for (k, v) in table {
        let id: u32 = k.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("class id '{k}' must be a non-negative integer"))
        })?;
        let label: Label = v.parse().map_err(serde::de::Error::custom)?;
        out.insert(id, label);
    }
    Ok(ClassMap::new(out))
}

fn config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .ok_or_else(|| anyhow!("cannot determine home directory"))?
        .home_dir()
        .to_path_buf();
    Ok(home.join(".config").join("scoopwatch"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl Config {
    /// Load `path` if given, otherwise the per-user config, installing the
    /// bundled default there on first use.
    pub fn resolve(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        match path {
            Some(p) => Ok((Self::load(p)?, p.to_path_buf())),
            None => {
                let p = default_config_path()?;
                Self::install_default(&p)?;
                Ok((Self::load(&p)?, p))
            }
        }
    }

    fn install_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(path, default_profile_text())
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("installed default config at {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        Self::parse(&txt).map_err(|e| anyhow!("{}: {e}", path.display()))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(txt).map_err(|e| anyhow!("failed to parse: {e}"))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    /// Zones in configured order; the first overlapping one wins.
    pub fn zones(&self) -> Result<Vec<Zone>> {
        self.roi
            .iter()
            .map(|r| {
                let [x1, y1, x2, y2] = r.rect;
                let rect = BBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32)
                    .map_err(|e| anyhow!("roi '{}': {e}", r.id))?;
                Ok(Zone {
                    id: r.id.clone(),
                    rect,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> serde_json::Value {
        let classes: BTreeMap<String, String> = self
            .classes
            .iter()
            .map(|(id, l)| (id.to_string(), l.to_string()))
            .collect();
        serde_json::json!({
            "name": self.meta.name,
            "tracking": {
                "distance_threshold": self.tracking.distance_threshold,
                "max_history": self.tracking.max_history,
                "max_missing_frames": self.tracking.max_missing_frames,
            },
            "entry": {
                "confirmation_window": self.entry.confirmation_window,
                "confirmation_hits": self.entry.confirmation_hits,
            },
            "policy": {
                "cleaning_timeout": self.policy.cleaning_timeout,
                "violation_cooldown": self.policy.violation_cooldown,
            },
            "classes": classes,
            "roi": self.roi.iter().map(|r| serde_json::json!({"id": r.id, "rect": r.rect})).collect::<Vec<_>>(),
            "violations_path": self.output.violations_path,
        })
    }
}

fn validate_config(c: &Config) -> Result<()> {
    if !(c.tracking.distance_threshold > 0.0) {
        return Err(anyhow!("tracking.distance_threshold must be positive"));
    }
    if c.tracking.max_history == 0 {
        return Err(anyhow!("tracking.max_history must be at least 1"));
    }
    if c.entry.confirmation_window == 0 || c.entry.confirmation_hits == 0 {
        return Err(anyhow!("entry.confirmation_window and confirmation_hits must be positive"));
    }
    if c.entry.confirmation_hits as u64 > c.entry.confirmation_window {
        return Err(anyhow!(
            "entry.confirmation_hits ({}) cannot exceed confirmation_window ({})",
            c.entry.confirmation_hits,
            c.entry.confirmation_window
        ));
    }
    if c.policy.cleaning_timeout == 0 {
        return Err(anyhow!("policy.cleaning_timeout must be positive"));
    }
    if c.output.queue_capacity == 0 {
        return Err(anyhow!("output.queue_capacity must be positive"));
    }
    if c.classes.is_empty() {
        return Err(anyhow!("classes must map at least one class id"));
    }
    if c.roi.is_empty() {
        return Err(anyhow!("at least one [[roi]] must be configured"));
    }

    let mut ids = HashSet::new();
    for r in &c.roi {
        if r.id.trim().is_empty() {
            return Err(anyhow!("roi with empty id"));
        }
        if !ids.insert(r.id.as_str()) {
            return Err(anyhow!("duplicate roi id '{}'", r.id));
        }
        let [x1, y1, x2, y2] = r.rect;
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!("roi '{}' has a degenerate rect {:?}", r.id, r.rect));
        }
    }
    Ok(())
}
