//! Board netlist cross-reference.
//!
//! The board file carries its own net table and per-pad net assignments.
//! Those never override the schematic model; where the two disagree the
//! disagreement is surfaced as a consistency warning, and pads the schematic
//! never modelled are added as extra pins.

use std::cmp::Ordering;
use std::collections::HashMap;

use netlens_sexpr::Sexpr;

use crate::librarian::{Librarian, PadLayout};
use crate::{natural_ref_cmp, Net, NetMember, NetScope, Page, Pin, PinRole, Warning};

pub(crate) fn cross_reference(
    pages: &mut [Page],
    board: &Sexpr,
    librarian: &mut Librarian,
    warnings: &mut Vec<Warning>,
) {
    // Net table: code -> name. Code 0 is the board's "no net" bucket.
    let mut net_names: HashMap<i64, String> = HashMap::new();
    for net in board.children("net") {
        if let (Some(code), Some(name)) = (net.arg_f64(1), net.arg(2)) {
            let code = code as i64;
            if code != 0 && !name.is_empty() {
                net_names.insert(code, name.to_string());
            }
        }
    }

    for footprint in board.children("footprint") {
        let Some(reference) = footprint_reference(footprint) else {
            continue;
        };
        let Some((page_idx, comp_idx)) = locate_component(pages, &reference) else {
            log::debug!("Board footprint {reference} has no schematic counterpart, skipping");
            continue;
        };

        // Pad-to-pin mapping comes from the footprint library when it
        // resolves, and from the board's own pad list otherwise.
        let layout = footprint
            .arg(1)
            .and_then(|lib_id| librarian.footprint(lib_id))
            .map(|l| (*l).clone())
            .unwrap_or_else(|| PadLayout::from_footprint(footprint));

        for pad in footprint.children("pad") {
            let Some(pad_number) = pad.arg(1) else { continue };
            let Some(code) = pad.child("net").and_then(|n| n.arg_f64(1)) else {
                continue;
            };
            let Some(board_net) = net_names.get(&(code as i64)) else {
                continue;
            };
            let pin_number = layout
                .logical_pin(pad_number)
                .unwrap_or(pad_number)
                .to_string();

            check_pad(
                pages,
                page_idx,
                comp_idx,
                &reference,
                &pin_number,
                board_net,
                warnings,
            );
        }
    }

    // Stamp board net codes onto the nets they name, including any nets the
    // pad sweep just added.
    let code_by_name: HashMap<&str, i64> = net_names
        .iter()
        .map(|(code, name)| (name.as_str(), *code))
        .collect();
    for page in pages.iter_mut() {
        for net in &mut page.nets {
            if let Some(code) = code_by_name.get(net.canonical_name()) {
                net.attributes
                    .insert("board_code".to_string(), code.to_string());
            }
        }
    }
}

/// Compare one pad's board net against the schematic model, warning on
/// disagreement and growing the model for pins the schematic never saw.
fn check_pad(
    pages: &mut [Page],
    page_idx: usize,
    comp_idx: usize,
    reference: &str,
    pin_number: &str,
    board_net: &str,
    warnings: &mut Vec<Warning>,
) {
    let page = &mut pages[page_idx];
    let existing_pin = page.components[comp_idx]
        .pins
        .iter()
        .position(|p| p.number == pin_number);

    match existing_pin {
        Some(pin_idx) => {
            let schematic_net = page.components[comp_idx].pins[pin_idx]
                .net
                .map(|id| page.nets[id].canonical_name().to_string());
            let Some(schematic_net) = schematic_net else {
                return;
            };
            if schematic_net != board_net {
                warnings.push(Warning::Consistency {
                    reference: reference.to_string(),
                    pin: pin_number.to_string(),
                    schematic_net,
                    board_net: board_net.to_string(),
                });
            }
        }
        None => {
            // Board-only pin. Attach it to the matching schematic net when
            // one exists, otherwise record a fresh board-sourced net.
            log::debug!("Board adds pin {pin_number} to {reference}, net '{board_net}'");
            let net_id = page
                .nets
                .iter()
                .position(|n| n.canonical_name() == board_net)
                .unwrap_or_else(|| {
                    page.nets.push(Net {
                        name: board_net.to_string(),
                        scope: NetScope::Local,
                        members: Vec::new(),
                        labels: Vec::new(),
                        attributes: Default::default(),
                    });
                    page.nets.len() - 1
                });
            let member = NetMember {
                reference: reference.to_string(),
                pin: pin_number.to_string(),
            };
            let members = &mut page.nets[net_id].members;
            // Member lists are kept in natural reference order, so the
            // insertion point must use the same comparison.
            let insert_at = members.partition_point(|m| {
                natural_ref_cmp(&m.reference, reference)
                    .then_with(|| natural_ref_cmp(&m.pin, pin_number))
                    != Ordering::Greater
            });
            members.insert(insert_at, member);
            page.components[comp_idx].pins.push(Pin {
                name: String::new(),
                number: pin_number.to_string(),
                role: PinRole::Passive,
                net: Some(net_id),
            });
        }
    }
}

fn footprint_reference(footprint: &Sexpr) -> Option<String> {
    footprint
        .children("property")
        .find(|p| p.arg(1) == Some("Reference"))
        .and_then(|p| p.arg(2))
        .or_else(|| {
            // Pre-v8 boards spell the reference as an fp_text node.
            footprint
                .children("fp_text")
                .find(|t| t.arg(1) == Some("reference"))
                .and_then(|t| t.arg(2))
        })
        .filter(|r| !r.is_empty() && *r != "REF**")
        .map(str::to_string)
}

fn locate_component(pages: &[Page], reference: &str) -> Option<(usize, usize)> {
    pages.iter().enumerate().find_map(|(pi, page)| {
        page.components
            .iter()
            .position(|c| c.reference == reference)
            .map(|ci| (pi, ci))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentInstance, NetId};

    fn one_page() -> Vec<Page> {
        vec![Page {
            name: "main".to_string(),
            components: vec![ComponentInstance {
                reference: "R1".to_string(),
                lib_id: "Device:R".to_string(),
                value: "10k".to_string(),
                footprint: Some("Resistor_SMD:R_0603".to_string()),
                pins: vec![
                    Pin {
                        name: "~".to_string(),
                        number: "1".to_string(),
                        role: PinRole::Passive,
                        net: Some(0),
                    },
                    Pin {
                        name: "~".to_string(),
                        number: "2".to_string(),
                        role: PinRole::Passive,
                        net: Some(1),
                    },
                ],
            }],
            nets: vec![
                Net {
                    name: "VCC".to_string(),
                    scope: NetScope::Local,
                    members: vec![NetMember {
                        reference: "R1".to_string(),
                        pin: "1".to_string(),
                    }],
                    labels: vec!["VCC".to_string()],
                    attributes: Default::default(),
                },
                Net {
                    name: "SIG".to_string(),
                    scope: NetScope::Local,
                    members: vec![NetMember {
                        reference: "R1".to_string(),
                        pin: "2".to_string(),
                    }],
                    labels: vec!["SIG".to_string()],
                    attributes: Default::default(),
                },
            ],
            sheet_pins: Vec::new(),
        }]
    }

    fn run(board_src: &str, pages: &mut Vec<Page>) -> Vec<Warning> {
        let board = netlens_sexpr::parse(board_src).unwrap();
        let mut librarian = Librarian::new(vec![], vec![]);
        let mut warnings = Vec::new();
        cross_reference(pages, &board, &mut librarian, &mut warnings);
        warnings
    }

    #[test]
    fn agreement_is_silent() {
        let mut pages = one_page();
        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (net 2 "SIG")
  (footprint "Resistor_SMD:R_0603"
    (property "Reference" "R1")
    (pad "1" smd roundrect (net 1 "VCC"))
    (pad "2" smd roundrect (net 2 "SIG"))))
"#,
            &mut pages,
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn disagreement_warns_without_override() {
        let mut pages = one_page();
        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (net 9 "GND")
  (footprint "Resistor_SMD:R_0603"
    (property "Reference" "R1")
    (pad "1" smd roundrect (net 1 "VCC"))
    (pad "2" smd roundrect (net 9 "GND"))))
"#,
            &mut pages,
        );
        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            Warning::Consistency {
                reference,
                pin,
                schematic_net,
                board_net,
            } => {
                assert_eq!(reference, "R1");
                assert_eq!(pin, "2");
                assert_eq!(schematic_net, "SIG");
                assert_eq!(board_net, "GND");
            }
            other => panic!("unexpected warning: {other}"),
        }
        // The schematic model keeps its own answer.
        assert_eq!(pages[0].nets[1].name, "SIG");
    }

    #[test]
    fn board_only_pin_extends_the_model() {
        let mut pages = one_page();
        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (footprint "Resistor_SMD:R_0603"
    (property "Reference" "R1")
    (pad "1" smd roundrect (net 1 "VCC"))
    (pad "3" smd roundrect (net 1 "VCC"))))
"#,
            &mut pages,
        );
        assert!(warnings.is_empty());
        let r1 = pages[0].component("R1").unwrap();
        assert_eq!(r1.pins.len(), 3);
        assert_eq!(r1.pin("3").unwrap().net, Some(0));
        let (_, vcc) = pages[0].net_named("VCC").unwrap();
        assert_eq!(vcc.members.len(), 2);
    }

    #[test]
    fn board_net_codes_become_attributes() {
        let mut pages = one_page();
        run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (net 2 "SIG"))
"#,
            &mut pages,
        );
        let (_, vcc) = pages[0].net_named("VCC").unwrap();
        assert_eq!(vcc.attributes.get("board_code").map(String::as_str), Some("1"));
        let (_, sig) = pages[0].net_named("SIG").unwrap();
        assert_eq!(sig.attributes.get("board_code").map(String::as_str), Some("2"));
    }

    #[test]
    fn unknown_footprint_is_ignored() {
        let mut pages = one_page();
        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (footprint "MountingHole:M3"
    (property "Reference" "H1")
    (pad "1" thru_hole circle (net 1 "VCC"))))
"#,
            &mut pages,
        );
        assert!(warnings.is_empty());
        assert_eq!(pages[0].components.len(), 1);
    }

    #[test]
    fn board_added_member_keeps_natural_reference_order() {
        // R10 sorts after R2 naturally even though it sorts before it
        // lexicographically.
        let resistor = |reference: &str, net: NetId| ComponentInstance {
            reference: reference.to_string(),
            lib_id: "Device:R".to_string(),
            value: "1k".to_string(),
            footprint: Some("Resistor_SMD:R_0603".to_string()),
            pins: vec![Pin {
                name: "~".to_string(),
                number: "1".to_string(),
                role: PinRole::Passive,
                net: Some(net),
            }],
        };
        let mut pages = vec![Page {
            name: "main".to_string(),
            components: vec![resistor("R2", 0), resistor("R10", 1)],
            nets: vec![
                Net {
                    name: "VCC".to_string(),
                    scope: NetScope::Local,
                    members: vec![NetMember {
                        reference: "R2".to_string(),
                        pin: "1".to_string(),
                    }],
                    labels: vec!["VCC".to_string()],
                    attributes: Default::default(),
                },
                Net {
                    name: "SIG".to_string(),
                    scope: NetScope::Local,
                    members: vec![NetMember {
                        reference: "R10".to_string(),
                        pin: "1".to_string(),
                    }],
                    labels: vec!["SIG".to_string()],
                    attributes: Default::default(),
                },
            ],
            sheet_pins: Vec::new(),
        }];

        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (footprint "Resistor_SMD:R_0603"
    (property "Reference" "R10")
    (pad "3" smd roundrect (net 1 "VCC"))))
"#,
            &mut pages,
        );
        assert!(warnings.is_empty());

        let (_, vcc) = pages[0].net_named("VCC").unwrap();
        let order: Vec<(&str, &str)> = vcc
            .members
            .iter()
            .map(|m| (m.reference.as_str(), m.pin.as_str()))
            .collect();
        assert_eq!(order, vec![("R2", "1"), ("R10", "3")]);
    }

    #[test]
    fn multi_pad_pins_collapse_before_comparison() {
        // Two pads named "2" on the board map onto the single logical pin 2.
        let mut pages = one_page();
        let warnings = run(
            r#"
(kicad_pcb
  (net 0 "")
  (net 1 "VCC")
  (net 2 "SIG")
  (footprint "Package_TO:TO-252"
    (property "Reference" "R1")
    (pad "1" smd rect (net 1 "VCC"))
    (pad "2" smd rect (net 2 "SIG"))
    (pad "2" smd rect (net 2 "SIG"))))
"#,
            &mut pages,
        );
        assert!(warnings.is_empty());
        assert_eq!(pages[0].component("R1").unwrap().pins.len(), 2);
    }
}
