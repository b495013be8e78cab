//! Symbol and footprint resolution with a session-scoped memoizing cache.
//!
//! Lookups are read-through and keyed by `(library, name)`. Sources are
//! tried in order: definitions embedded in the project files themselves,
//! sibling library files in the project directory, then installed KiCad
//! search paths. A miss is memoized too, so a missing library is probed at
//! most once per session. Nothing is ever fabricated on a miss: the caller
//! keeps whatever pin data the schematic carries inline.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use netlens_sexpr::Sexpr;

use crate::PinRole;

/// Pin table entry of a library symbol. Coordinates are the symbol-local
/// connection point of the pin.
#[derive(Debug, Clone)]
pub struct SymbolPin {
    pub name: String,
    pub number: String,
    pub role: PinRole,
    pub x: f64,
    pub y: f64,
}

/// Resolved pin table of one library symbol.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub lib_id: String,
    pub pins: Vec<SymbolPin>,
}

/// Pad layout of a footprint: physical pad identifier -> logical pin.
/// Several mechanically separate pads may share one identifier (thermal
/// tabs, split drains), which is exactly the many-to-one grouping queries
/// need to see as a single pin.
#[derive(Debug, Clone, Default)]
pub struct PadLayout {
    pub pad_to_pin: BTreeMap<String, String>,
}

impl PadLayout {
    /// Derive a layout from any footprint S-expression (library `.kicad_mod`
    /// or an instance embedded in a board file).
    pub fn from_footprint(footprint: &Sexpr) -> Self {
        let mut pad_to_pin = BTreeMap::new();
        for pad in footprint.children("pad") {
            if let Some(id) = pad.arg(1) {
                // Pads sharing an identifier collapse into one logical pin.
                pad_to_pin
                    .entry(id.to_string())
                    .or_insert_with(|| id.to_string());
            }
        }
        PadLayout { pad_to_pin }
    }

    pub fn logical_pin(&self, pad: &str) -> Option<&str> {
        self.pad_to_pin.get(pad).map(|s| s.as_str())
    }
}

/// Resolves symbol pin tables and footprint pad layouts for the builders.
/// One instance is created per build and passed in explicitly; there is no
/// ambient process-wide cache.
pub struct Librarian {
    symbol_dirs: Vec<PathBuf>,
    footprint_dirs: Vec<PathBuf>,
    /// Definitions registered from the project files themselves
    /// (`lib_symbols` blocks); these take priority over disk lookups.
    inline: HashMap<String, Arc<SymbolDef>>,
    symbols: HashMap<(String, String), Option<Arc<SymbolDef>>>,
    footprints: HashMap<(String, String), Option<Arc<PadLayout>>>,
}

impl Librarian {
    pub fn new(symbol_dirs: Vec<PathBuf>, footprint_dirs: Vec<PathBuf>) -> Self {
        Self {
            symbol_dirs,
            footprint_dirs,
            inline: HashMap::new(),
            symbols: HashMap::new(),
            footprints: HashMap::new(),
        }
    }

    /// Librarian for a project directory: sibling library files first, then
    /// the installed KiCad search paths.
    pub fn for_project(dir: &Path) -> Self {
        let mut symbol_dirs = vec![dir.to_path_buf()];
        symbol_dirs.extend(installed_dirs("KICAD_SYMBOL_DIR", "symbols"));
        let mut footprint_dirs = vec![dir.to_path_buf()];
        footprint_dirs.extend(installed_dirs("KICAD_FOOTPRINT_DIR", "footprints"));
        Self::new(symbol_dirs, footprint_dirs)
    }

    /// Register a symbol definition found inline in a project file.
    pub fn register_symbol(&mut self, def: SymbolDef) {
        self.inline.insert(def.lib_id.clone(), Arc::new(def));
    }

    /// Resolve a symbol pin table by `Library:Name` identity.
    pub fn symbol(&mut self, lib_id: &str) -> Option<Arc<SymbolDef>> {
        if let Some(def) = self.inline.get(lib_id) {
            return Some(def.clone());
        }
        let (library, name) = split_lib_id(lib_id);
        let key = (library.to_string(), name.to_string());
        if let Some(cached) = self.symbols.get(&key) {
            return cached.clone();
        }
        let loaded = self.load_symbol(library, name);
        if loaded.is_none() {
            log::debug!("Symbol miss: {lib_id}");
        }
        self.symbols.insert(key, loaded.clone());
        loaded
    }

    /// Resolve a footprint pad layout by `Library:Name` identity.
    pub fn footprint(&mut self, lib_id: &str) -> Option<Arc<PadLayout>> {
        let (library, name) = split_lib_id(lib_id);
        let key = (library.to_string(), name.to_string());
        if let Some(cached) = self.footprints.get(&key) {
            return cached.clone();
        }
        let loaded = self.load_footprint(library, name);
        if loaded.is_none() {
            log::debug!("Footprint miss: {lib_id}");
        }
        self.footprints.insert(key, loaded.clone());
        loaded
    }

    fn load_symbol(&self, library: &str, name: &str) -> Option<Arc<SymbolDef>> {
        for dir in &self.symbol_dirs {
            let path = dir.join(format!("{library}.kicad_sym"));
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let tree = match netlens_sexpr::parse(&content) {
                Ok(tree) => tree,
                Err(e) => {
                    log::warn!("Failed to parse symbol library {}: {e}", path.display());
                    continue;
                }
            };
            for symbol in tree.children("symbol") {
                if symbol.arg(1) == Some(name) {
                    let lib_id = format!("{library}:{name}");
                    return Some(Arc::new(parse_symbol_def(&lib_id, symbol)));
                }
            }
        }
        None
    }

    fn load_footprint(&self, library: &str, name: &str) -> Option<Arc<PadLayout>> {
        for dir in &self.footprint_dirs {
            let path = dir
                .join(format!("{library}.pretty"))
                .join(format!("{name}.kicad_mod"));
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match netlens_sexpr::parse(&content) {
                Ok(tree) => return Some(Arc::new(PadLayout::from_footprint(&tree))),
                Err(e) => {
                    log::warn!("Failed to parse footprint {}: {e}", path.display());
                }
            }
        }
        None
    }
}

/// Split `Library:Name` into its halves. Identifiers without a colon map to
/// an empty library.
pub fn split_lib_id(lib_id: &str) -> (&str, &str) {
    match lib_id.split_once(':') {
        Some((lib, name)) => (lib, name),
        None => ("", lib_id),
    }
}

/// Extract the pin table from a `(symbol ...)` definition, descending into
/// nested unit sub-symbols.
pub fn parse_symbol_def(lib_id: &str, symbol: &Sexpr) -> SymbolDef {
    let mut pins = Vec::new();
    collect_pins(symbol, &mut pins);
    SymbolDef {
        lib_id: lib_id.to_string(),
        pins,
    }
}

fn collect_pins(node: &Sexpr, pins: &mut Vec<SymbolPin>) {
    for pin in node.children("pin") {
        let role = pin
            .arg(1)
            .map(PinRole::from_kicad)
            .unwrap_or(PinRole::Passive);
        let at = pin.child("at");
        let x = at.and_then(|a| a.arg_f64(1)).unwrap_or(0.0);
        let y = at.and_then(|a| a.arg_f64(2)).unwrap_or(0.0);
        let number = pin.child_atom("number").unwrap_or_default().to_string();
        let name = pin.child_atom("name").unwrap_or_default().to_string();
        pins.push(SymbolPin {
            name,
            number,
            role,
            x,
            y,
        });
    }
    for sub in node.children("symbol") {
        collect_pins(sub, pins);
    }
}

/// Installed KiCad data directories for the current platform, with an
/// environment override checked first.
fn installed_dirs(env_var: &str, kind: &str) -> Vec<PathBuf> {
    let mut dirs_found = Vec::new();
    if let Ok(env_path) = std::env::var(env_var) {
        dirs_found.push(PathBuf::from(env_path));
    }

    let candidates = if cfg!(target_os = "macos") {
        vec![
            PathBuf::from(format!(
                "/Applications/KiCad/KiCad.app/Contents/SharedSupport/{kind}"
            )),
            PathBuf::from(format!("/Library/Application Support/kicad/{kind}")),
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            PathBuf::from(format!("C:\\Program Files\\KiCad\\share\\kicad\\{kind}")),
            PathBuf::from(format!(
                "C:\\Program Files (x86)\\KiCad\\share\\kicad\\{kind}"
            )),
        ]
    } else {
        vec![
            PathBuf::from(format!("/usr/share/kicad/{kind}")),
            PathBuf::from(format!("/usr/local/share/kicad/{kind}")),
            PathBuf::from(format!("/opt/kicad/share/kicad/{kind}")),
        ]
    };
    dirs_found.extend(candidates.into_iter().filter(|p| p.exists()));

    if let Some(home) = dirs::home_dir() {
        let local = home.join(format!(".local/share/kicad/{kind}"));
        if local.exists() {
            dirs_found.push(local);
        }
    }
    dirs_found
}
