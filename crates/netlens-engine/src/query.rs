//! The three read-only query shapes served against a built model.
//!
//! Index stays summary-only by construction: it touches counts and the
//! global table, never a page body. Page delegates to the emitter. Context
//! fans out from one component or one net to everything electrically
//! adjacent, following canonical net identity across pages.

use serde::Serialize;

use netlens_model::{emitter, Net, NetScope, Page, Project};

use crate::EngineError;

/// Context lookups take exactly one of the two selectors.
#[derive(Debug, Clone, Default)]
pub struct ContextQuery {
    pub component: Option<String>,
    pub net: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexResult {
    pub pages: Vec<PageSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PageSummary {
    pub name: String,
    pub components: usize,
    pub nets: usize,
    /// Canonical names of the cross-page nets this page participates in.
    pub globals: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PageResult {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContextResult {
    Component(ComponentContext),
    Net(NetContext),
}

#[derive(Debug, Serialize)]
pub struct ComponentContext {
    pub page: String,
    pub reference: String,
    pub lib_id: String,
    pub value: String,
    pub footprint: Option<String>,
    pub pins: Vec<PinContext>,
}

#[derive(Debug, Serialize)]
pub struct PinContext {
    pub number: String,
    pub name: String,
    pub role: String,
    pub net: String,
    /// Other components touching the same net, across every page where the
    /// net appears.
    pub connected: Vec<NetTouch>,
}

#[derive(Debug, Serialize)]
pub struct NetContext {
    /// Canonical identity of the net.
    pub name: String,
    pub members: Vec<NetTouch>,
}

/// One `(page, reference, pin)` endpoint in a context answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetTouch {
    pub page: String,
    pub reference: String,
    pub pin: String,
}

pub fn index(project: &Project) -> IndexResult {
    let pages = project
        .pages
        .iter()
        .map(|page| PageSummary {
            name: page.name.clone(),
            components: page.components.len(),
            nets: page.nets.len(),
            globals: page
                .nets
                .iter()
                .filter_map(|net| match &net.scope {
                    NetScope::Global(canonical) => Some(canonical.clone()),
                    NetScope::Local => None,
                })
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect(),
        })
        .collect();
    IndexResult {
        pages,
        warnings: project.warnings.iter().map(|w| w.to_string()).collect(),
    }
}

pub fn page(project: &Project, name: &str) -> Result<PageResult, EngineError> {
    let Some((_, page)) = project.page(name) else {
        let candidates = project.pages.iter().map(|p| p.name.as_str());
        return Err(EngineError::NotFound {
            kind: "page",
            name: name.to_string(),
            suggestion: closest(name, candidates),
        });
    };
    Ok(PageResult {
        name: page.name.clone(),
        text: emitter::emit_page(page),
    })
}

pub fn context(project: &Project, request: &ContextQuery) -> Result<ContextResult, EngineError> {
    match (&request.component, &request.net) {
        (Some(_), Some(_)) => Err(EngineError::InvalidQuery(
            "supply either a component reference or a net name, not both".to_string(),
        )),
        (None, None) => Err(EngineError::InvalidQuery(
            "supply a component reference or a net name".to_string(),
        )),
        (Some(reference), None) => component_context(project, reference).map(ContextResult::Component),
        (None, Some(net)) => net_context(project, net).map(ContextResult::Net),
    }
}

fn component_context(project: &Project, reference: &str) -> Result<ComponentContext, EngineError> {
    let located = project.pages.iter().find_map(|page| {
        page.component(reference).map(|comp| (page, comp))
    });
    let Some((page, comp)) = located else {
        let candidates = project
            .pages
            .iter()
            .flat_map(|p| p.components.iter().map(|c| c.reference.as_str()));
        return Err(EngineError::NotFound {
            kind: "component",
            name: reference.to_string(),
            suggestion: closest(reference, candidates),
        });
    };

    let pins = comp
        .pins
        .iter()
        .map(|pin| {
            let (net_name, mut connected) = match pin.net.and_then(|id| page.nets.get(id)) {
                Some(net) => (
                    net.canonical_name().to_string(),
                    net_members(project, page, net),
                ),
                None => (String::new(), Vec::new()),
            };
            connected.retain(|t| t.reference != comp.reference);
            PinContext {
                number: pin.number.clone(),
                name: pin.name.clone(),
                role: pin.role.as_str().to_string(),
                net: net_name,
                connected,
            }
        })
        .collect();

    Ok(ComponentContext {
        page: page.name.clone(),
        reference: comp.reference.clone(),
        lib_id: comp.lib_id.clone(),
        value: comp.value.clone(),
        footprint: comp.footprint.clone(),
        pins,
    })
}

fn net_context(project: &Project, name: &str) -> Result<NetContext, EngineError> {
    // Canonical cross-page identity first, then page-local names.
    if let Some(refs) = project.globals.get(name) {
        let mut members = Vec::new();
        for r in refs {
            let page = &project.pages[r.page];
            collect_touches(page, &page.nets[r.net], &mut members);
        }
        return Ok(NetContext {
            name: name.to_string(),
            members,
        });
    }

    for page in &project.pages {
        if let Some((_, net)) = page.net_named(name) {
            return Ok(NetContext {
                name: net.canonical_name().to_string(),
                members: net_members(project, page, net),
            });
        }
    }

    let candidates: std::collections::BTreeSet<&str> = project
        .globals
        .keys()
        .map(String::as_str)
        .chain(
            project
                .pages
                .iter()
                .flat_map(|p| p.nets.iter().map(|n| n.name.as_str())),
        )
        .collect();
    Err(EngineError::NotFound {
        kind: "net",
        name: name.to_string(),
        suggestion: closest(name, candidates),
    })
}

/// Every touch of `net`, following its canonical identity to other pages
/// when it is global. Ordered by page, then by the member order inside each
/// net, which is reference order.
fn net_members(project: &Project, page: &Page, net: &Net) -> Vec<NetTouch> {
    let mut touches = Vec::new();
    match &net.scope {
        NetScope::Global(canonical) => match project.globals.get(canonical) {
            Some(refs) => {
                for r in refs {
                    let p = &project.pages[r.page];
                    collect_touches(p, &p.nets[r.net], &mut touches);
                }
            }
            None => collect_touches(page, net, &mut touches),
        },
        NetScope::Local => collect_touches(page, net, &mut touches),
    }
    touches
}

fn collect_touches(page: &Page, net: &Net, out: &mut Vec<NetTouch>) {
    for member in &net.members {
        out.push(NetTouch {
            page: page.name.clone(),
            reference: member.reference.clone(),
            pin: member.pin.clone(),
        });
    }
}

/// Closest candidate by edit distance, used for NotFound suggestions. Only
/// reasonably near names qualify; a wildly different name suggests nothing.
fn closest<'a>(target: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let d = levenshtein(target, candidate);
        if best.map_or(true, |(bd, bc)| d < bd || (d == bd && candidate < bc)) {
            best = Some((d, candidate));
        }
    }
    let (distance, name) = best?;
    let limit = (target.chars().count().max(name.chars().count()) / 2).max(1);
    (distance <= limit).then(|| name.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { prev } else { prev + 1 };
            prev = row[j + 1];
            row[j + 1] = cost.min(row[j] + 1).min(prev + 1);
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("VBUS", "VBUS"), 0);
        assert_eq!(levenshtein("VBUS", "VBUSS"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn suggestion_requires_proximity() {
        assert_eq!(
            closest("VBSU", ["VBUS", "GND"]),
            Some("VBUS".to_string())
        );
        assert_eq!(closest("XTAL_IN", ["GND"]), None);
        // Ties break toward the lexicographically smaller candidate.
        assert_eq!(closest("R3", ["R1", "R2"]), Some("R1".to_string()));
    }
}
