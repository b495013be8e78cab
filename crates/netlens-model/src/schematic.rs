//! Schematic page walker: turns one page's parse tree into components and
//! page-local nets.
//!
//! The walker recognizes a closed set of node kinds (`lib_symbols`, symbol
//! instances, `wire`, `junction`, `label`, `global_label`,
//! `hierarchical_label`, `no_connect`, `sheet`) and ignores everything else.
//! Connectivity is resolved by collecting every connection point into a flat
//! array and merging coincident or same-named points with a disjoint-set.

use std::collections::{BTreeSet, HashMap, HashSet};

use netlens_sexpr::Sexpr;

use crate::dsu::DisjointSet;
use crate::librarian::{self, Librarian};
use crate::{
    natural_ref_cmp, BuildError, ComponentInstance, Net, NetId, NetMember, NetScope, Page, Pin,
    PinRole, SheetPin, Warning,
};

/// Page model plus the linking data the cross-page resolution pass consumes.
#[derive(Debug)]
pub struct PageDraft {
    pub page: Page,
    pub links: Vec<NetLink>,
}

/// Cross-page linking facts for one electrical group. `net` is `None` for
/// label-only groups that carry hierarchy plumbing but no pins.
#[derive(Debug)]
pub struct NetLink {
    pub net: Option<NetId>,
    pub global_labels: BTreeSet<String>,
    pub hier_labels: BTreeSet<String>,
    /// `(child page, pin name)` for each sheet pin in the group.
    pub sheet_pins: Vec<(String, String)>,
}

/// One entry in the flat connection-point array.
struct ConnPoint {
    key: Option<(i64, i64)>,
    node: NodeKind,
}

enum NodeKind {
    Pin { comp: usize, pin: usize },
    Wire,
    Junction,
    NoConnect,
    LocalLabel(String),
    GlobalLabel(String),
    HierLabel(String),
    SheetPin { child: String, name: String },
    /// Power-symbol pin; the symbol's value names a global net.
    PowerPin(String),
}

/// One drawn wire segment, in grid coordinates. `endpoint` is the index of
/// the connection point at `a`.
struct WireSegment {
    a: (i64, i64),
    b: (i64, i64),
    endpoint: usize,
}

impl WireSegment {
    /// True when `p` lies on the closed segment between `a` and `b`.
    fn contains(&self, p: (i64, i64)) -> bool {
        let (ax, ay) = self.a;
        let (bx, by) = self.b;
        let (px, py) = p;
        let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
        cross == 0
            && px >= ax.min(bx)
            && px <= ax.max(bx)
            && py >= ay.min(by)
            && py <= ay.max(by)
    }
}

/// Snap a coordinate pair to the 0.01 mm grid used for point matching.
fn grid_key(x: f64, y: f64) -> (i64, i64) {
    ((x * 100.0).round() as i64, (y * 100.0).round() as i64)
}

/// Transform a symbol-local pin position into page coordinates. Symbol space
/// has +Y up while the page has +Y down, so the rotated Y is subtracted.
fn place_pin(
    (ix, iy): (f64, f64),
    angle: f64,
    mirror: Option<&str>,
    (lx, ly): (f64, f64),
) -> (f64, f64) {
    let (mut x, mut y) = (lx, ly);
    match mirror {
        Some("x") => y = -y,
        Some("y") => x = -x,
        _ => {}
    }
    let (rx, ry) = match (angle.round() as i64).rem_euclid(360) {
        90 => (-y, x),
        180 => (-x, -y),
        270 => (y, -x),
        _ => (x, y),
    };
    (ix + rx, iy - ry)
}

pub(crate) fn build_page(
    name: &str,
    tree: &Sexpr,
    librarian: &mut Librarian,
    warnings: &mut Vec<Warning>,
) -> Result<PageDraft, BuildError> {
    // Embedded symbol definitions feed the librarian before any instance is
    // resolved against it.
    if let Some(lib_symbols) = tree.child("lib_symbols") {
        for symbol in lib_symbols.children("symbol") {
            if let Some(lib_id) = symbol.arg(1) {
                librarian.register_symbol(librarian::parse_symbol_def(lib_id, symbol));
            }
        }
    }

    let mut components: Vec<ComponentInstance> = Vec::new();
    let mut seen_refs: HashSet<String> = HashSet::new();
    let mut points: Vec<ConnPoint> = Vec::new();
    let mut wire_runs: Vec<Vec<usize>> = Vec::new();
    let mut segments: Vec<WireSegment> = Vec::new();
    let mut sheet_pins_summary: Vec<SheetPin> = Vec::new();

    for node in tree.as_list().unwrap_or(&[]) {
        match node.tag() {
            Some("symbol") if node.child("lib_id").is_some() => {
                walk_symbol_instance(
                    name,
                    node,
                    librarian,
                    warnings,
                    &mut components,
                    &mut seen_refs,
                    &mut points,
                )?;
            }
            Some("wire") => {
                if let Some(pts) = node.child("pts") {
                    let run: Vec<usize> = pts
                        .children("xy")
                        .filter_map(|xy| Some((xy.arg_f64(1)?, xy.arg_f64(2)?)))
                        .map(|(x, y)| {
                            points.push(ConnPoint {
                                key: Some(grid_key(x, y)),
                                node: NodeKind::Wire,
                            });
                            points.len() - 1
                        })
                        .collect();
                    for pair in run.windows(2) {
                        if let (Some(a), Some(b)) = (points[pair[0]].key, points[pair[1]].key) {
                            segments.push(WireSegment {
                                a,
                                b,
                                endpoint: pair[0],
                            });
                        }
                    }
                    if run.len() >= 2 {
                        wire_runs.push(run);
                    }
                }
            }
            Some("junction") => {
                if let Some((x, y)) = node_at(node) {
                    points.push(ConnPoint {
                        key: Some(grid_key(x, y)),
                        node: NodeKind::Junction,
                    });
                }
            }
            Some("no_connect") => {
                if let Some((x, y)) = node_at(node) {
                    points.push(ConnPoint {
                        key: Some(grid_key(x, y)),
                        node: NodeKind::NoConnect,
                    });
                }
            }
            Some("label") => push_label(node, &mut points, NodeKind::LocalLabel),
            Some("global_label") => push_label(node, &mut points, NodeKind::GlobalLabel),
            Some("hierarchical_label") => {
                if let Some(text) = node.arg(1) {
                    sheet_pins_summary.push(SheetPin::ToParent {
                        name: text.to_string(),
                    });
                }
                push_label(node, &mut points, NodeKind::HierLabel)
            }
            Some("sheet") => {
                walk_sheet(node, &mut points, &mut sheet_pins_summary);
            }
            _ => {}
        }
    }

    // Merge phase: coincident points, wire runs, same-named labels.
    let mut dsu = DisjointSet::new(points.len());
    let mut by_key: HashMap<(i64, i64), usize> = HashMap::new();
    let mut by_label: HashMap<(u8, &str), usize> = HashMap::new();
    for (idx, point) in points.iter().enumerate() {
        if let Some(key) = point.key {
            match by_key.get(&key) {
                Some(&first) => {
                    dsu.union(first, idx);
                }
                None => {
                    by_key.insert(key, idx);
                }
            }
        }
        // Same-named labels on a page are the same electrical node even
        // without a connecting wire. Global labels and power pins share a
        // namespace; local and hierarchical labels each have their own.
        let label_key = match &point.node {
            NodeKind::LocalLabel(name) => Some((0u8, name.as_str())),
            NodeKind::GlobalLabel(name) | NodeKind::PowerPin(name) => Some((1, name.as_str())),
            NodeKind::HierLabel(name) => Some((2, name.as_str())),
            _ => None,
        };
        if let Some(key) = label_key {
            match by_label.get(&key) {
                Some(&first) => {
                    dsu.union(first, idx);
                }
                None => {
                    by_label.insert(key, idx);
                }
            }
        }
    }
    for run in &wire_runs {
        for pair in run.windows(2) {
            dsu.union(pair[0], pair[1]);
        }
    }
    // Pins, labels and junctions attach anywhere along a wire segment, not
    // only at its endpoints. Grid keys are integers, so containment is exact.
    for idx in 0..points.len() {
        if matches!(points[idx].node, NodeKind::Wire) {
            continue;
        }
        let Some(key) = points[idx].key else { continue };
        for segment in &segments {
            if segment.contains(key) {
                dsu.union(idx, segment.endpoint);
            }
        }
    }

    // Group phase: gather each root's facts in document order.
    let mut group_order: Vec<usize> = Vec::new();
    let mut group_facts: HashMap<usize, GroupFacts> = HashMap::new();
    for idx in 0..points.len() {
        let root = dsu.find(idx);
        let facts = group_facts.entry(root).or_insert_with(|| {
            group_order.push(root);
            GroupFacts::default()
        });
        match &points[idx].node {
            NodeKind::Pin { comp, pin } => facts.pins.push((*comp, *pin)),
            NodeKind::NoConnect => facts.no_connect = true,
            NodeKind::LocalLabel(name) => {
                facts.local_labels.insert(name.clone());
            }
            NodeKind::GlobalLabel(name) | NodeKind::PowerPin(name) => {
                facts.global_labels.insert(name.clone());
            }
            NodeKind::HierLabel(name) => {
                facts.hier_labels.insert(name.clone());
            }
            NodeKind::SheetPin { child, name } => {
                facts.sheet_pins.push((child.clone(), name.clone()));
            }
            NodeKind::Wire | NodeKind::Junction => {}
        }
    }

    // Finalize phase: one net per group that touches at least one pin;
    // label-only groups survive as linking stubs; bare wire groups vanish.
    let mut nets: Vec<Net> = Vec::new();
    let mut links: Vec<NetLink> = Vec::new();
    for root in group_order {
        let Some(mut facts) = group_facts.remove(&root) else {
            continue;
        };
        if facts.pins.is_empty() {
            if !facts.global_labels.is_empty()
                || !facts.hier_labels.is_empty()
                || !facts.sheet_pins.is_empty()
            {
                links.push(NetLink {
                    net: None,
                    global_labels: facts.global_labels,
                    hier_labels: facts.hier_labels,
                    sheet_pins: facts.sheet_pins,
                });
            }
            continue;
        }

        facts.pins.sort_by(|a, b| {
            natural_ref_cmp(&components[a.0].reference, &components[b.0].reference)
                .then_with(|| {
                    natural_ref_cmp(
                        &components[a.0].pins[a.1].number,
                        &components[b.0].pins[b.1].number,
                    )
                })
        });
        facts.pins.dedup();

        let (first_comp, first_pin) = facts.pins[0];
        let synthesized = |prefix: &str| {
            format!(
                "{prefix}-({}-Pad{})",
                components[first_comp].reference, components[first_comp].pins[first_pin].number
            )
        };
        let net_name = facts
            .global_labels
            .iter()
            .next()
            .or_else(|| facts.hier_labels.iter().next())
            .or_else(|| facts.local_labels.iter().next())
            .cloned()
            .unwrap_or_else(|| {
                if facts.pins.len() == 1 {
                    synthesized("unconnected")
                } else {
                    synthesized("Net")
                }
            });

        let net_id = nets.len();
        let mut labels: Vec<String> = facts
            .global_labels
            .iter()
            .chain(facts.hier_labels.iter())
            .cloned()
            .collect();
        labels.sort();
        labels.dedup();

        let mut members = Vec::with_capacity(facts.pins.len());
        for &(comp, pin) in &facts.pins {
            members.push(NetMember {
                reference: components[comp].reference.clone(),
                pin: components[comp].pins[pin].number.clone(),
            });
            components[comp].pins[pin].net = Some(net_id);
            if facts.no_connect {
                components[comp].pins[pin].role = PinRole::NoConnect;
            }
        }

        nets.push(Net {
            name: net_name,
            scope: NetScope::Local,
            members,
            labels,
            attributes: Default::default(),
        });
        links.push(NetLink {
            net: Some(net_id),
            global_labels: facts.global_labels,
            hier_labels: facts.hier_labels,
            sheet_pins: facts.sheet_pins,
        });
    }

    // Pins that never produced a connection point (inline-only pin data from
    // a library miss) still get their no-connect singleton.
    for comp_idx in 0..components.len() {
        for pin_idx in 0..components[comp_idx].pins.len() {
            if components[comp_idx].pins[pin_idx].net.is_some() {
                continue;
            }
            let net_id = nets.len();
            let reference = components[comp_idx].reference.clone();
            let number = components[comp_idx].pins[pin_idx].number.clone();
            nets.push(Net {
                name: format!("unconnected-({reference}-Pad{number})"),
                scope: NetScope::Local,
                members: vec![NetMember {
                    reference,
                    pin: number,
                }],
                labels: Vec::new(),
                attributes: Default::default(),
            });
            components[comp_idx].pins[pin_idx].net = Some(net_id);
            links.push(NetLink {
                net: Some(net_id),
                global_labels: BTreeSet::new(),
                hier_labels: BTreeSet::new(),
                sheet_pins: Vec::new(),
            });
        }
    }

    // Net ids index into `nets`, so reordering components is safe here.
    components.sort_by(|a, b| natural_ref_cmp(&a.reference, &b.reference));

    log::debug!(
        "Page '{name}': {} components, {} nets, {} link groups",
        components.len(),
        nets.len(),
        links.len()
    );

    Ok(PageDraft {
        page: Page {
            name: name.to_string(),
            components,
            nets,
            sheet_pins: sheet_pins_summary,
        },
        links,
    })
}

#[derive(Default)]
struct GroupFacts {
    pins: Vec<(usize, usize)>,
    local_labels: BTreeSet<String>,
    global_labels: BTreeSet<String>,
    hier_labels: BTreeSet<String>,
    sheet_pins: Vec<(String, String)>,
    no_connect: bool,
}

fn node_at(node: &Sexpr) -> Option<(f64, f64)> {
    let at = node.child("at")?;
    Some((at.arg_f64(1)?, at.arg_f64(2)?))
}

fn push_label(
    node: &Sexpr,
    points: &mut Vec<ConnPoint>,
    make: impl Fn(String) -> NodeKind,
) {
    let Some(text) = node.arg(1) else { return };
    points.push(ConnPoint {
        key: node_at(node).map(|(x, y)| grid_key(x, y)),
        node: make(text.to_string()),
    });
}

fn property<'a>(node: &'a Sexpr, key: &str) -> Option<&'a str> {
    node.children("property")
        .find(|p| p.arg(1) == Some(key))
        .and_then(|p| p.arg(2))
        .filter(|v| !v.is_empty())
}

#[allow(clippy::too_many_arguments)]
fn walk_symbol_instance(
    page: &str,
    node: &Sexpr,
    librarian: &mut Librarian,
    warnings: &mut Vec<Warning>,
    components: &mut Vec<ComponentInstance>,
    seen_refs: &mut HashSet<String>,
    points: &mut Vec<ConnPoint>,
) -> Result<(), BuildError> {
    let Some(lib_id) = node.child_atom("lib_id") else {
        return Ok(());
    };
    let lib_id = lib_id.to_string();
    let Some(reference) = property(node, "Reference").map(str::to_string) else {
        log::warn!("Symbol instance of {lib_id} on page '{page}' has no reference, skipping");
        return Ok(());
    };
    let value = property(node, "Value").unwrap_or_default().to_string();

    let at = node.child("at");
    let origin = (
        at.and_then(|a| a.arg_f64(1)).unwrap_or(0.0),
        at.and_then(|a| a.arg_f64(2)).unwrap_or(0.0),
    );
    let angle = at.and_then(|a| a.arg_f64(3)).unwrap_or(0.0);
    let mirror = node.child("mirror").and_then(|m| m.arg(1));

    let def = librarian.symbol(&lib_id);

    // Power symbols (reference '#PWR...') are net name sources, not
    // components: each pin position acts like a global label bearing the
    // symbol's value.
    if reference.starts_with('#') {
        if let Some(def) = def {
            for pin in &def.pins {
                let (x, y) = place_pin(origin, angle, mirror, (pin.x, pin.y));
                points.push(ConnPoint {
                    key: Some(grid_key(x, y)),
                    node: NodeKind::PowerPin(value.clone()),
                });
            }
        }
        return Ok(());
    }

    if !seen_refs.insert(reference.clone()) {
        return Err(BuildError::DuplicateReference {
            page: page.to_string(),
            reference,
        });
    }

    let comp_idx = components.len();
    let mut pins = Vec::new();
    match def {
        Some(def) => {
            for pin_def in &def.pins {
                let pin_idx = pins.len();
                pins.push(Pin {
                    name: pin_def.name.clone(),
                    number: pin_def.number.clone(),
                    role: pin_def.role,
                    net: None,
                });
                let (x, y) = place_pin(origin, angle, mirror, (pin_def.x, pin_def.y));
                points.push(ConnPoint {
                    key: Some(grid_key(x, y)),
                    node: NodeKind::Pin {
                        comp: comp_idx,
                        pin: pin_idx,
                    },
                });
            }
        }
        None => {
            // Degrade to the pins the instance carries inline. They have no
            // geometry, so they finalize as no-connect singletons.
            let (library, name) = librarian::split_lib_id(&lib_id);
            warnings.push(Warning::LibraryMiss {
                library: library.to_string(),
                name: name.to_string(),
                reference: Some(reference.clone()),
            });
            for pin in node.children("pin") {
                if let Some(number) = pin.arg(1) {
                    pins.push(Pin {
                        name: String::new(),
                        number: number.to_string(),
                        role: PinRole::Passive,
                        net: None,
                    });
                }
            }
        }
    }

    components.push(ComponentInstance {
        reference,
        lib_id,
        value,
        footprint: property(node, "Footprint").map(str::to_string),
        pins,
    });
    Ok(())
}

fn walk_sheet(
    node: &Sexpr,
    points: &mut Vec<ConnPoint>,
    sheet_pins_summary: &mut Vec<SheetPin>,
) {
    let child = property(node, "Sheetname")
        .map(str::to_string)
        .or_else(|| {
            property(node, "Sheetfile")
                .map(|f| f.trim_end_matches(".kicad_sch").to_string())
        });
    let Some(child) = child else { return };

    for pin in node.children("pin") {
        let Some(pin_name) = pin.arg(1) else { continue };
        sheet_pins_summary.push(SheetPin::ToChild {
            child_page: child.clone(),
            name: pin_name.to_string(),
        });
        points.push(ConnPoint {
            key: node_at(pin).map(|(x, y)| grid_key(x, y)),
            node: NodeKind::SheetPin {
                child: child.clone(),
                name: pin_name.to_string(),
            },
        });
    }
}
