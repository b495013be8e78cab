//! Connectivity model for multi-page KiCad projects.
//!
//! A [`Project`] is built once from a directory of `.kicad_sch` pages plus one
//! `.kicad_pcb` board layout, and holds exact component/pin/net connectivity
//! in a form that is cheap to query and to serialize. The model is read-only:
//! nothing here ever writes back to the source files.
//!
//! The build pipeline: each page file goes through the generic S-expression
//! reader, the schematic walker merges connection points into page-local nets,
//! the board walker cross-checks pad/net assignments, the [`Librarian`] fills
//! in symbol pin tables, and a final linking pass resolves cross-page net
//! identity through global labels and sheet pins.

pub mod board;
pub mod emitter;
pub mod librarian;
pub mod schematic;

mod dsu;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use serde::Serialize;

pub use dsu::DisjointSet;
pub use librarian::Librarian;

/// Index of a net inside its owning [`Page`].
pub type NetId = usize;

/// Default bound on a single blocking file read during a build.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Electrical role of a pin, collapsed from the KiCad pin electrical types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PinRole {
    Input,
    Output,
    Bidirectional,
    Power,
    Passive,
    NoConnect,
}

impl PinRole {
    /// Map a KiCad pin electrical type onto the reduced role set. Unknown
    /// types fall back to `Passive`.
    pub fn from_kicad(etype: &str) -> Self {
        match etype {
            "input" => PinRole::Input,
            "output" | "open_collector" | "open_emitter" => PinRole::Output,
            "bidirectional" | "tri_state" => PinRole::Bidirectional,
            "power_in" | "power_out" => PinRole::Power,
            "no_connect" => PinRole::NoConnect,
            _ => PinRole::Passive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PinRole::Input => "input",
            PinRole::Output => "output",
            PinRole::Bidirectional => "bidirectional",
            PinRole::Power => "power",
            PinRole::Passive => "passive",
            PinRole::NoConnect => "no_connect",
        }
    }
}

/// A named, typed connection point on a component instance.
#[derive(Debug, Clone, Serialize)]
pub struct Pin {
    pub name: String,
    pub number: String,
    pub role: PinRole,
    /// Net binding, as an index into the owning page's net table. `None` only
    /// transiently during the build; every finalized pin lands in a net.
    pub net: Option<NetId>,
}

/// One placed component on a page.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInstance {
    /// Reference designator, unique within the page.
    pub reference: String,
    /// Symbol identity, e.g. `Device:R`.
    pub lib_id: String,
    pub value: String,
    pub footprint: Option<String>,
    /// Pins in symbol order.
    pub pins: Vec<Pin>,
}

impl ComponentInstance {
    pub fn pin(&self, number: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.number == number)
    }
}

/// One `(reference, pin number)` endpoint of a net.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetMember {
    pub reference: String,
    pub pin: String,
}

/// Whether a net is confined to its page or participates in a project-wide
/// canonical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "canonical", rename_all = "snake_case")]
pub enum NetScope {
    Local,
    /// Cross-page net; carries the canonical project-wide name.
    Global(String),
}

/// The set of pins that are electrically the same node, within one page.
#[derive(Debug, Clone, Serialize)]
pub struct Net {
    pub name: String,
    pub scope: NetScope,
    /// Members sorted by natural reference order, then pin number.
    pub members: Vec<NetMember>,
    /// Global/hierarchical label names this net exposes on its page.
    pub labels: Vec<String>,
    /// Board-derived attributes (net code, board-side name).
    pub attributes: BTreeMap<String, String>,
}

impl Net {
    pub fn canonical_name(&self) -> &str {
        match &self.scope {
            NetScope::Global(name) => name,
            NetScope::Local => &self.name,
        }
    }
}

/// A port crossing a page boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum SheetPin {
    /// Pin on a sheet symbol placed on this page, leading into a child page.
    ToChild { child_page: String, name: String },
    /// Hierarchical label on this page, exported to the instantiating parent.
    ToParent { name: String },
}

/// One schematic sheet of the project.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub name: String,
    pub components: Vec<ComponentInstance>,
    pub nets: Vec<Net>,
    pub sheet_pins: Vec<SheetPin>,
}

impl Page {
    pub fn component(&self, reference: &str) -> Option<&ComponentInstance> {
        self.components.iter().find(|c| c.reference == reference)
    }

    pub fn net_named(&self, name: &str) -> Option<(NetId, &Net)> {
        self.nets
            .iter()
            .enumerate()
            .find(|(_, n)| n.name == name)
    }
}

/// Location of a net within a project: page index plus net index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetRef {
    pub page: usize,
    pub net: NetId,
}

/// The fully linked, immutable project model.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    /// Pages in deterministic (file name) order.
    pub pages: Vec<Page>,
    /// Canonical cross-page net name -> participating nets, ordered by page.
    pub globals: BTreeMap<String, Vec<NetRef>>,
    /// Non-fatal anomalies accumulated during the build.
    pub warnings: Vec<Warning>,
}

impl Project {
    pub fn page(&self, name: &str) -> Option<(usize, &Page)> {
        self.pages
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }
}

/// Non-fatal build anomalies. These accompany query results; they never abort
/// a build.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A symbol or footprint could not be resolved from any library source.
    LibraryMiss {
        library: String,
        name: String,
        reference: Option<String>,
    },
    /// Board and schematic disagree about a pin's net.
    Consistency {
        reference: String,
        pin: String,
        schematic_net: String,
        board_net: String,
    },
    /// A sheet pin and its child page's hierarchical labels do not line up.
    SheetPinMismatch {
        parent_page: String,
        child_page: String,
        pin: String,
    },
    /// One electrical node carries more than one distinct global label name.
    AmbiguousGlobalLabel { page: String, names: Vec<String> },
    /// Unrelated cross-page groups reuse the same label name; the
    /// hierarchical-only group is tracked under a page-qualified identity.
    LabelCollision { name: String, page: String },
    /// Trouble locating the board layout file.
    BoardLayout { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::LibraryMiss {
                library,
                name,
                reference,
            } => {
                write!(f, "library miss: {library}:{name}")?;
                if let Some(r) = reference {
                    write!(f, " (component {r})")?;
                }
                Ok(())
            }
            Warning::Consistency {
                reference,
                pin,
                schematic_net,
                board_net,
            } => write!(
                f,
                "board/schematic disagreement on {reference}.{pin}: schematic '{schematic_net}' vs board '{board_net}'"
            ),
            Warning::SheetPinMismatch {
                parent_page,
                child_page,
                pin,
            } => write!(
                f,
                "sheet pin '{pin}' between page '{parent_page}' and child '{child_page}' has no matching counterpart"
            ),
            Warning::AmbiguousGlobalLabel { page, names } => write!(
                f,
                "net on page '{page}' carries multiple global labels: {}",
                names.join(", ")
            ),
            Warning::LabelCollision { name, page } => write!(
                f,
                "label '{name}' names unrelated nets; the group through page '{page}' is tracked as '{name}@{page}'"
            ),
            Warning::BoardLayout { message } => write!(f, "board layout: {message}"),
        }
    }
}

/// Fatal errors during model construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out reading {path} after {timeout:?}")]
    ReadTimeout { path: PathBuf, timeout: Duration },

    #[error("parse error in {path} at byte {offset}: {source}", offset = source.offset())]
    Parse {
        path: PathBuf,
        #[source]
        source: netlens_sexpr::ParseError,
    },

    #[error("duplicate reference designator '{reference}' on page '{page}'")]
    DuplicateReference { page: String, reference: String },

    #[error("net '{net}' on page '{page}' finalized with zero members")]
    EmptyNet { page: String, net: String },

    #[error("no .kicad_sch files found in {0}")]
    NoPages(PathBuf),
}

/// Build the project model for a directory, with a project-scoped librarian
/// and the default read timeout.
pub fn build_project(dir: &Path) -> Result<Project, BuildError> {
    let mut librarian = Librarian::for_project(dir);
    build_project_with(dir, &mut librarian, DEFAULT_READ_TIMEOUT)
}

/// Build the project model using an explicitly supplied librarian. The
/// librarian is passed in rather than held globally so builds are
/// deterministic and testable in isolation.
pub fn build_project_with(
    dir: &Path,
    librarian: &mut Librarian,
    read_timeout: Duration,
) -> Result<Project, BuildError> {
    log::debug!("Building project model for {}", dir.display());
    let mut warnings = Vec::new();

    let (sch_files, board_file) = discover_files(dir, &mut warnings)?;
    if sch_files.is_empty() {
        return Err(BuildError::NoPages(dir.to_path_buf()));
    }

    // Per-page construction.
    let mut drafts = Vec::with_capacity(sch_files.len());
    for path in &sch_files {
        let name = page_name(path);
        log::debug!("Parsing page '{name}'");
        let content = read_to_string_timeout(path, read_timeout)?;
        let tree = netlens_sexpr::parse(&content).map_err(|source| BuildError::Parse {
            path: path.clone(),
            source,
        })?;
        let draft = schematic::build_page(&name, &tree, librarian, &mut warnings)?;
        drafts.push(draft);
    }

    // Cross-page identity resolution.
    let globals = link_pages(&mut drafts, &mut warnings);

    let mut pages: Vec<Page> = drafts.into_iter().map(|d| d.page).collect();

    // Board cross-reference.
    if let Some(board_path) = board_file {
        log::debug!("Cross-referencing board {}", board_path.display());
        let content = read_to_string_timeout(&board_path, read_timeout)?;
        let tree = netlens_sexpr::parse(&content).map_err(|source| BuildError::Parse {
            path: board_path.clone(),
            source,
        })?;
        board::cross_reference(&mut pages, &tree, librarian, &mut warnings);
    }

    // Structural invariants. A zero-member net here means the builder let an
    // unreliable model through, which is fatal.
    for page in &pages {
        for net in &page.nets {
            if net.members.is_empty() {
                return Err(BuildError::EmptyNet {
                    page: page.name.clone(),
                    net: net.name.clone(),
                });
            }
        }
    }

    log::debug!(
        "Project model built: {} pages, {} warnings",
        pages.len(),
        warnings.len()
    );
    Ok(Project {
        pages,
        globals,
        warnings,
    })
}

/// Locate the page files and the single board layout in the project
/// directory. Zero or multiple board files degrade to a warning.
fn discover_files(
    dir: &Path,
    warnings: &mut Vec<Warning>,
) -> Result<(Vec<PathBuf>, Option<PathBuf>), BuildError> {
    let entries = std::fs::read_dir(dir).map_err(|source| BuildError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut sch_files = Vec::new();
    let mut board_files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BuildError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("kicad_sch") => sch_files.push(path),
            Some("kicad_pcb") => board_files.push(path),
            _ => {}
        }
    }
    sch_files.sort();
    board_files.sort();

    let board = match board_files.len() {
        0 => {
            warnings.push(Warning::BoardLayout {
                message: format!("no .kicad_pcb file in {}", dir.display()),
            });
            None
        }
        1 => Some(board_files.remove(0)),
        n => {
            warnings.push(Warning::BoardLayout {
                message: format!("{n} .kicad_pcb files found, using {}", board_files[0].display()),
            });
            Some(board_files.remove(0))
        }
    };

    Ok((sch_files, board))
}

fn page_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("page")
        .to_string()
}

/// Blocking read bounded by a timeout. The read runs on a worker thread; if
/// the deadline passes the worker is abandoned and the build fails.
fn read_to_string_timeout(path: &Path, timeout: Duration) -> Result<String, BuildError> {
    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    std::thread::spawn(move || {
        let _ = tx.send(std::fs::read_to_string(&owned));
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(content)) => Ok(content),
        Ok(Err(source)) => Err(BuildError::Io {
            path: path.to_path_buf(),
            source,
        }),
        Err(_) => Err(BuildError::ReadTimeout {
            path: path.to_path_buf(),
            timeout,
        }),
    }
}

/// Resolve cross-page net identity: nets sharing a global label name merge,
/// and a parent sheet pin merges with the same-named hierarchical label in
/// the child page. Returns the canonical-name table.
fn link_pages(
    drafts: &mut [schematic::PageDraft],
    warnings: &mut Vec<Warning>,
) -> BTreeMap<String, Vec<NetRef>> {
    // Assign a flat id to every link group across all pages.
    let mut base = Vec::with_capacity(drafts.len());
    let mut total = 0usize;
    for draft in drafts.iter() {
        base.push(total);
        total += draft.links.len();
    }
    let mut dsu = DisjointSet::new(total);

    // Same-named global labels unify project-wide.
    let mut by_global: HashMap<&str, usize> = HashMap::new();
    for (p, draft) in drafts.iter().enumerate() {
        for (l, link) in draft.links.iter().enumerate() {
            let gid = base[p] + l;
            for name in &link.global_labels {
                match by_global.get(name.as_str()) {
                    Some(&first) => {
                        dsu.union(first, gid);
                    }
                    None => {
                        by_global.insert(name, gid);
                    }
                }
            }
        }
    }

    // Hierarchical boundaries: sheet pin on the parent <-> hierarchical label
    // in the child, matched by exact name.
    let page_index: HashMap<&str, usize> = drafts
        .iter()
        .enumerate()
        .map(|(i, d)| (d.page.name.as_str(), i))
        .collect();
    let hier_maps: Vec<BTreeMap<&str, usize>> = drafts
        .iter()
        .enumerate()
        .map(|(p, draft)| {
            let page_base = base[p];
            draft
                .links
                .iter()
                .enumerate()
                .flat_map(move |(l, link)| {
                    link.hier_labels
                        .iter()
                        .map(move |name| (name.as_str(), page_base + l))
                })
                .collect()
        })
        .collect();

    let mut instantiated: BTreeSet<(usize, String)> = BTreeSet::new();
    let mut unions = Vec::new();
    for (p, draft) in drafts.iter().enumerate() {
        for (l, link) in draft.links.iter().enumerate() {
            let gid = base[p] + l;
            for (child, pin) in &link.sheet_pins {
                let Some(&c) = page_index.get(child.as_str()) else {
                    warnings.push(Warning::SheetPinMismatch {
                        parent_page: draft.page.name.clone(),
                        child_page: child.clone(),
                        pin: pin.clone(),
                    });
                    continue;
                };
                instantiated.insert((c, pin.clone()));
                match hier_maps[c].get(pin.as_str()) {
                    Some(&child_gid) => unions.push((gid, child_gid)),
                    None => warnings.push(Warning::SheetPinMismatch {
                        parent_page: draft.page.name.clone(),
                        child_page: child.clone(),
                        pin: pin.clone(),
                    }),
                }
            }
        }
    }
    for (a, b) in unions {
        dsu.union(a, b);
    }

    // Reverse direction: a hierarchical label whose page is instantiated but
    // whose name no parent sheet exposes.
    let referenced_children: BTreeSet<usize> =
        instantiated.iter().map(|(c, _)| *c).collect();
    for (c, draft) in drafts.iter().enumerate() {
        if !referenced_children.contains(&c) {
            continue;
        }
        for name in hier_maps[c].keys() {
            if !instantiated.contains(&(c, name.to_string())) {
                warnings.push(Warning::SheetPinMismatch {
                    parent_page: String::new(),
                    child_page: draft.page.name.clone(),
                    pin: name.to_string(),
                });
            }
        }
    }

    // Gather groups and decide canonical names.
    let mut groups: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
    for (p, draft) in drafts.iter().enumerate() {
        for l in 0..draft.links.len() {
            let gid = base[p] + l;
            groups.entry(dsu.find(gid)).or_default().push((p, l));
        }
    }

    let mut globals: BTreeMap<String, Vec<NetRef>> = BTreeMap::new();
    let mut group_list: Vec<_> = groups.into_values().collect();
    group_list.sort();
    for members in group_list {
        let mut global_names: BTreeSet<String> = BTreeSet::new();
        let mut hier_names: BTreeSet<String> = BTreeSet::new();
        let mut net_refs: Vec<NetRef> = Vec::new();
        let mut pages_spanned: BTreeSet<usize> = BTreeSet::new();
        for &(p, l) in &members {
            let link = &drafts[p].links[l];
            global_names.extend(link.global_labels.iter().cloned());
            hier_names.extend(link.hier_labels.iter().cloned());
            if let Some(net) = link.net {
                net_refs.push(NetRef { page: p, net });
                pages_spanned.insert(p);
            }
        }
        if net_refs.is_empty() {
            continue; // label-only plumbing, nothing electrical to expose
        }

        let cross_page = !global_names.is_empty() || pages_spanned.len() > 1;
        if !cross_page {
            continue;
        }

        if global_names.len() > 1 {
            let page = drafts[members[0].0].page.name.clone();
            warnings.push(Warning::AmbiguousGlobalLabel {
                page,
                names: global_names.iter().cloned().collect(),
            });
        }
        net_refs.sort_by_key(|r| (r.page, r.net));
        let mut canonical = global_names
            .iter()
            .next()
            .or_else(|| hier_names.iter().next())
            .cloned()
            .unwrap_or_else(|| {
                drafts[net_refs[0].page].page.nets[net_refs[0].net].name.clone()
            });

        // Unrelated parent/child pairs may reuse a hierarchical label name.
        // Those groups were never unioned, so the name alone cannot serve as
        // the project-wide identity: qualify the hierarchical-only group by
        // its first page and surface the collision.
        if globals.contains_key(&canonical) {
            if global_names.is_empty() {
                let page = drafts[net_refs[0].page].page.name.clone();
                warnings.push(Warning::LabelCollision {
                    name: canonical.clone(),
                    page: page.clone(),
                });
                canonical = format!("{canonical}@{page}");
            } else if let Some(prior) = globals.remove(&canonical) {
                // The earlier entry came from hierarchical labels; the true
                // global label keeps the plain name.
                let page = drafts[prior[0].page].page.name.clone();
                warnings.push(Warning::LabelCollision {
                    name: canonical.clone(),
                    page: page.clone(),
                });
                let qualified = format!("{canonical}@{page}");
                for r in &prior {
                    drafts[r.page].page.nets[r.net].scope =
                        NetScope::Global(qualified.clone());
                }
                globals.insert(qualified, prior);
            }
        }

        for r in &net_refs {
            drafts[r.page].page.nets[r.net].scope = NetScope::Global(canonical.clone());
        }
        globals.insert(canonical, net_refs);
    }

    globals
}

/// Compare reference designators in natural order: alphabetic prefix first,
/// then numeric suffix by value, so `R2` sorts before `R10`.
pub fn natural_ref_cmp(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> (String, Option<u64>, String) {
        let digits_at = s.find(|c: char| c.is_ascii_digit());
        match digits_at {
            Some(i) => {
                let (prefix, rest) = s.split_at(i);
                let end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                let (num, tail) = rest.split_at(end);
                (prefix.to_string(), num.parse().ok(), tail.to_string())
            }
            None => (s.to_string(), None, String::new()),
        }
    };
    let (pa, na, ta) = split(a);
    let (pb, nb, tb) = split(b);
    pa.cmp(&pb)
        .then(na.cmp(&nb))
        .then(ta.cmp(&tb))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_role_mapping() {
        assert_eq!(PinRole::from_kicad("input"), PinRole::Input);
        assert_eq!(PinRole::from_kicad("power_in"), PinRole::Power);
        assert_eq!(PinRole::from_kicad("power_out"), PinRole::Power);
        assert_eq!(PinRole::from_kicad("tri_state"), PinRole::Bidirectional);
        assert_eq!(PinRole::from_kicad("no_connect"), PinRole::NoConnect);
        assert_eq!(PinRole::from_kicad("unspecified"), PinRole::Passive);
        assert_eq!(PinRole::from_kicad("free"), PinRole::Passive);
    }

    #[test]
    fn natural_reference_ordering() {
        let mut refs = vec!["R10", "R2", "C1", "U100", "U20", "R2A"];
        refs.sort_by(|a, b| natural_ref_cmp(a, b));
        assert_eq!(refs, vec!["C1", "R2", "R2A", "R10", "U20", "U100"]);
    }

    #[test]
    fn net_canonical_name() {
        let net = Net {
            name: "5V".into(),
            scope: NetScope::Global("VBUS".into()),
            members: vec![],
            labels: vec![],
            attributes: BTreeMap::new(),
        };
        assert_eq!(net.canonical_name(), "VBUS");
        let local = Net {
            name: "Net-(R1-Pad1)".into(),
            scope: NetScope::Local,
            members: vec![],
            labels: vec![],
            attributes: BTreeMap::new(),
        };
        assert_eq!(local.canonical_name(), "Net-(R1-Pad1)");
    }

    #[test]
    fn read_timeout_reports_path() {
        let err =
            read_to_string_timeout(Path::new("/nonexistent/netlens-test"), Duration::from_secs(1))
                .unwrap_err();
        match err {
            BuildError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/netlens-test"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
