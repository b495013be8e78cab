//! Compact text serialization of a finalized page model.
//!
//! The format is line-oriented and fully deterministic: component lines in
//! reference order, then a summary of multi-member nets in name order.
//! Emitting an unchanged model twice yields byte-identical text, so revision
//! diffs of the output track real connectivity changes.
//!
//! ```text
//! page main
//!
//! R1 10k Resistor_SMD:R_0603 1=DIV 2=VCC
//! R2 4k7 Resistor_SMD:R_0603 1=DIV 2=GND
//!
//! nets
//! DIV: R1.1 R2.1
//! VCC @VCC: R1.2 U1.7
//! ```
//!
//! A `@name` suffix on a net marks a cross-page label the net exposes; the
//! first one is its canonical project-wide identity.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::{Net, NetScope, Page};

/// Placeholder for an absent value or footprint field.
const EMPTY_FIELD: &str = "-";

pub fn emit_page(page: &Page) -> String {
    let mut out = String::new();
    // Page builds keep components sorted by reference; rely on that order.
    let _ = writeln!(out, "page {}", page.name);
    let _ = writeln!(out);

    for comp in &page.components {
        let value = if comp.value.is_empty() {
            EMPTY_FIELD
        } else {
            comp.value.as_str()
        };
        let footprint = comp.footprint.as_deref().unwrap_or(EMPTY_FIELD);
        let bindings = comp
            .pins
            .iter()
            .map(|pin| {
                let net = pin
                    .net
                    .and_then(|id| page.nets.get(id))
                    .map(Net::canonical_name)
                    .unwrap_or(EMPTY_FIELD);
                format!("{}={net}", pin.number)
            })
            .join(" ");
        if bindings.is_empty() {
            let _ = writeln!(out, "{} {value} {footprint}", comp.reference);
        } else {
            let _ = writeln!(out, "{} {value} {footprint} {bindings}", comp.reference);
        }
    }

    let mut summary: Vec<&Net> = page.nets.iter().filter(|n| n.members.len() > 1).collect();
    summary.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
    if !summary.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "nets");
        for net in summary {
            let mut head = net.canonical_name().to_string();
            match &net.scope {
                NetScope::Global(canonical) => {
                    let _ = write!(head, " @{canonical}");
                    for label in net.labels.iter().filter(|l| *l != canonical) {
                        let _ = write!(head, " @{label}");
                    }
                }
                NetScope::Local => {
                    for label in &net.labels {
                        let _ = write!(head, " @{label}");
                    }
                }
            }
            let members = net
                .members
                .iter()
                .map(|m| format!("{}.{}", m.reference, m.pin))
                .join(" ");
            let _ = writeln!(out, "{head}: {members}");
        }
    }

    out
}
