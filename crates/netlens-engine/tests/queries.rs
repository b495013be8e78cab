//! Query behavior against a built two-page project.

use std::path::Path;

use netlens_engine::{ContextQuery, ContextResult, DesignServer, EngineError};

const TOP: &str = r##"
(kicad_sch (version 20231120)
  (lib_symbols
    (symbol "Device:R"
      (symbol "R_1_1"
        (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
        (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2"))))
    (symbol "power:GND"
      (symbol "GND_1_1"
        (pin power_in line (at 0 0 0) (length 0) (name "GND") (number "1")))))
  (symbol (lib_id "Device:R") (at 50 50 0)
    (property "Reference" "R1" (at 0 0 0))
    (property "Value" "10k" (at 0 0 0))
    (property "Footprint" "Resistor_SMD:R_0603" (at 0 0 0)))
  (symbol (lib_id "power:GND") (at 50 53.81 0)
    (property "Reference" "#PWR01" (at 0 0 0))
    (property "Value" "GND" (at 0 0 0)))
  (wire (pts (xy 50 46.19) (xy 60 46.19)))
  (global_label "5V" (shape input) (at 50 46.19 0))
  (sheet (at 60 40)
    (property "Sheetname" "Power_Supply" (at 0 0 0))
    (property "Sheetfile" "Power_Supply.kicad_sch" (at 0 0 0))
    (pin "5V" input (at 60 46.19 0))))
"##;

const POWER: &str = r##"
(kicad_sch (version 20231120)
  (lib_symbols
    (symbol "Regulator:LDO"
      (symbol "LDO_1_1"
        (pin power_in line (at -5.08 0 0) (length 1.27) (name "IN") (number "1"))
        (pin power_out line (at 5.08 0 180) (length 1.27) (name "OUT") (number "2"))
        (pin power_in line (at 0 -5.08 90) (length 1.27) (name "GND") (number "3"))))
    (symbol "power:GND"
      (symbol "GND_1_1"
        (pin power_in line (at 0 0 0) (length 0) (name "GND") (number "1")))))
  (symbol (lib_id "Regulator:LDO") (at 100 100 0)
    (property "Reference" "U1" (at 0 0 0))
    (property "Value" "AMS1117-5.0" (at 0 0 0))
    (property "Footprint" "Package_TO:SOT-223" (at 0 0 0)))
  (symbol (lib_id "power:GND") (at 100 105.08 0)
    (property "Reference" "#PWR02" (at 0 0 0))
    (property "Value" "GND" (at 0 0 0)))
  (wire (pts (xy 105.08 100) (xy 110 100)))
  (hierarchical_label "5V" (shape output) (at 110 100 0))
  (label "VIN_RAW" (at 94.92 100 0)))
"##;

const BOARD: &str = r#"
(kicad_pcb (version 20240108)
  (net 0 "")
  (net 1 "5V")
  (net 2 "GND")
  (net 3 "VIN_RAW")
  (footprint "Resistor_SMD:R_0603"
    (property "Reference" "R1")
    (pad "1" smd roundrect (net 1 "5V"))
    (pad "2" smd roundrect (net 2 "GND")))
  (footprint "Package_TO:SOT-223"
    (property "Reference" "U1")
    (pad "1" smd rect (net 3 "VIN_RAW"))
    (pad "2" smd rect (net 1 "5V"))
    (pad "2" smd rect (net 1 "5V"))
    (pad "3" smd rect (net 2 "GND"))))
"#;

fn write_project(dir: &Path) {
    std::fs::write(dir.join("top.kicad_sch"), TOP).unwrap();
    std::fs::write(dir.join("Power_Supply.kicad_sch"), POWER).unwrap();
    std::fs::write(dir.join("main.kicad_pcb"), BOARD).unwrap();
}

fn server() -> (tempfile::TempDir, DesignServer) {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    (dir, DesignServer::new())
}

fn net_query(name: &str) -> ContextQuery {
    ContextQuery {
        component: None,
        net: Some(name.to_string()),
    }
}

fn component_query(reference: &str) -> ContextQuery {
    ContextQuery {
        component: Some(reference.to_string()),
        net: None,
    }
}

#[test]
fn index_lists_pages_with_counts_and_globals() {
    let (dir, server) = server();
    let index = server.index(dir.path()).unwrap();

    assert_eq!(index.pages.len(), 2);
    let power = &index.pages[0];
    assert_eq!(power.name, "Power_Supply");
    assert_eq!(power.components, 1);
    assert_eq!(power.nets, 3);
    assert_eq!(power.globals, vec!["5V", "GND"]);

    let top = &index.pages[1];
    assert_eq!(top.name, "top");
    assert_eq!(top.components, 1);
    assert_eq!(top.nets, 2);
    assert_eq!(top.globals, vec!["5V", "GND"]);

    assert!(index.warnings.is_empty());
}

#[test]
fn net_context_spans_both_pages() {
    let (dir, server) = server();
    let result = server.context(dir.path(), &net_query("5V")).unwrap();

    let ContextResult::Net(ctx) = result else {
        panic!("expected net context");
    };
    assert_eq!(ctx.name, "5V");
    let touches: Vec<(&str, &str, &str)> = ctx
        .members
        .iter()
        .map(|t| (t.page.as_str(), t.reference.as_str(), t.pin.as_str()))
        .collect();
    assert_eq!(
        touches,
        vec![("Power_Supply", "U1", "2"), ("top", "R1", "1")]
    );
}

#[test]
fn component_context_reports_one_logical_pin_per_pad_group() {
    let (dir, server) = server();
    let result = server.context(dir.path(), &component_query("U1")).unwrap();

    let ContextResult::Component(ctx) = result else {
        panic!("expected component context");
    };
    assert_eq!(ctx.page, "Power_Supply");
    assert_eq!(ctx.value, "AMS1117-5.0");
    // Three logical pins despite the doubled drain pad on the board.
    assert_eq!(ctx.pins.len(), 3);

    let out = ctx.pins.iter().find(|p| p.number == "2").unwrap();
    assert_eq!(out.net, "5V");
    // Neighbors follow the global identity onto the top page and exclude U1.
    assert!(out
        .connected
        .iter()
        .any(|t| t.page == "top" && t.reference == "R1" && t.pin == "1"));
    assert!(out.connected.iter().all(|t| t.reference != "U1"));
}

#[test]
fn context_requires_exactly_one_selector() {
    let (dir, server) = server();

    let neither = server.context(dir.path(), &ContextQuery::default());
    assert!(matches!(neither, Err(EngineError::InvalidQuery(_))));

    let both = server.context(
        dir.path(),
        &ContextQuery {
            component: Some("U1".to_string()),
            net: Some("5V".to_string()),
        },
    );
    assert!(matches!(both, Err(EngineError::InvalidQuery(_))));
}

#[test]
fn misspelled_page_gets_a_suggestion() {
    let (dir, server) = server();
    match server.page(dir.path(), "Power_Suply") {
        Err(EngineError::NotFound {
            kind,
            name,
            suggestion,
        }) => {
            assert_eq!(kind, "page");
            assert_eq!(name, "Power_Suply");
            assert_eq!(suggestion.as_deref(), Some("Power_Supply"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn misspelled_component_and_net_get_suggestions() {
    let (dir, server) = server();

    match server.context(dir.path(), &component_query("U2")) {
        Err(EngineError::NotFound { suggestion, .. }) => {
            assert_eq!(suggestion.as_deref(), Some("U1"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    match server.context(dir.path(), &net_query("VIN_RAV")) {
        Err(EngineError::NotFound { suggestion, .. }) => {
            assert_eq!(suggestion.as_deref(), Some("VIN_RAW"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn page_text_matches_emitted_model() {
    let (dir, server) = server();
    let page = server.page(dir.path(), "top").unwrap();
    assert!(page.text.starts_with("page top\n"));
    assert!(page.text.contains("R1 10k Resistor_SMD:R_0603 1=5V 2=GND"));
    // Same model, same bytes.
    let again = server.page(dir.path(), "top").unwrap();
    assert_eq!(page.text, again.text);
}

#[test]
fn context_results_serialize_with_a_mode_tag() {
    let (dir, server) = server();

    let net = server.context(dir.path(), &net_query("5V")).unwrap();
    let json = serde_json::to_value(&net).unwrap();
    assert_eq!(json["mode"], "net");
    assert_eq!(json["name"], "5V");
    assert_eq!(json["members"][0]["reference"], "U1");

    let comp = server.context(dir.path(), &component_query("R1")).unwrap();
    let json = serde_json::to_value(&comp).unwrap();
    assert_eq!(json["mode"], "component");
    assert_eq!(json["pins"][0]["role"], "passive");
}

#[test]
fn local_net_query_stays_on_its_page() {
    let (dir, server) = server();
    let result = server.context(dir.path(), &net_query("VIN_RAW")).unwrap();
    let ContextResult::Net(ctx) = result else {
        panic!("expected net context");
    };
    assert_eq!(ctx.name, "VIN_RAW");
    assert_eq!(ctx.members.len(), 1);
    assert_eq!(ctx.members[0].reference, "U1");
    assert_eq!(ctx.members[0].pin, "1");
}
