//! Integration tests for generation and export through the unit aggregate
//!
//! These tests verify that:
//! - The startup script follows the fixed composition order
//! - Generation is deterministic and fails closed
//! - File copies are root-restricted and carry their permission flags
//! - Export policies preserve or replace runtime state as documented

mod common;

use common::{Fixture, read_script};
use iocmgr::services::ExportPolicy;
use iocmgr::services::modules::Module;
use iocmgr::{DiagnosticError, Severity, Unit, UnitStatus};
use std::fs;
use std::os::unix::fs::PermissionsExt;

fn mode(path: &camino::Utf8Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

fn position(script: &str, needle: &str) -> usize {
    script
        .find(needle)
        .unwrap_or_else(|| panic!("{needle:?} not found in script:\n{script}"))
}

/// A unit with sources collected and every section in use.
fn full_unit(fixture: &Fixture) -> Unit {
    let mut unit = fixture.repository.create_unit("alpha").unwrap();
    let incoming = fixture.incoming(&[
        ("motor.db", "record(motor, \"$(P)$(R)\") {}\n"),
        ("dev.proto", "Terminator = LF;\n"),
        ("init.cmd", "dbpf alpha:INIT 1\n"),
    ]);
    unit.collect_sources(Some(&incoming)).unwrap();

    unit.set("IOC", "bin", "motorApp").unwrap();
    unit.set("IOC", "module", "caputlog, stream, autosave").unwrap();
    unit.set("ENV", "epics_env", "EPICS_CA_MAX_ARRAY_BYTES = 1000000").unwrap();
    unit.set("RAW", "cmd_before_dbload", "epicsThreadSleep(1)").unwrap();
    unit.set("RAW", "cmd_at_dbload", "dbLoadRecords(\"db/extra.db\")").unwrap();
    unit.set("RAW", "cmd_after_iocinit", "dbpf(\"alpha:READY\",\"1\")").unwrap();
    unit.set("DB", "load", "motor.db, P=MTR:, R=m1; motor.db, P=MTR:, R=m2").unwrap();
    unit
}

#[test]
fn test_script_composition_order() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();

    let script = read_script(&unit);
    assert!(script.starts_with("#!../../bin/linux-x86_64/motorApp\n"));

    let ordered = [
        "epicsEnvSet(\"IOC\",\"alpha\")",
        "epicsEnvSet(\"TOP\",\"/opt/EPICS/RUN/alpha\")",
        "cd \"${TOP}\"",
        "dbLoadDatabase(\"dbd/motorApp.dbd\")",
        "motorApp_registerRecordDeviceDriver(pdbbase)",
        "epicsEnvSet(\"EPICS_CA_MAX_ARRAY_BYTES\",\"1000000\")",
        "STREAM_PROTOCOL_PATH",
        "set_requestfile_path",
        "asSetFilename",
        "epicsThreadSleep(1)",
        "dbLoadRecords(\"db/save_restoreStatus.db\",\"P=alpha:\")",
        "dbLoadRecords(\"db/extra.db\")",
        "dbLoadTemplate(\"db/alpha.substitutions\")",
        "iocInit()",
        "create_monitor_set(\"alpha-settings.req\",5,\"\")",
        "caPutLogInit(",
        "dbpf(\"alpha:READY\", \"1\")",
        "## report ioc info",
        "dbl >> \"${TOP}/log/alpha.info\"",
    ];
    for pair in ordered.windows(2) {
        assert!(
            position(&script, pair[0]) < position(&script, pair[1]),
            "{:?} should come before {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_generated_tree() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();

    let project = unit.project_dir();
    assert_eq!(mode(&project.join("startup/st.cmd")), 0o755);
    assert_eq!(mode(&project.join("startup/db/alpha.substitutions")), 0o444);
    assert!(project.join("startup/db/motor.db").is_file());
    assert!(project.join("startup/db/dev.proto").is_file());
    assert!(project.join("startup/db/save_restoreStatus.db").is_file());
    assert!(project.join("startup/autosave/alpha-settings.req").is_file());
    assert!(project.join("startup/default.acf").is_file());
    assert!(project.join("settings/autosave").is_dir());
    assert!(project.join("log").is_dir());

    let substitutions =
        fs::read_to_string(project.join("startup/db/alpha.substitutions")).unwrap();
    assert_eq!(
        substitutions,
        "file db/motor.db {\n    pattern { P, R }\n        { MTR:, m1 }\n}\n\n\
         file db/motor.db {\n    pattern { P, R }\n        { MTR:, m2 }\n}\n"
    );
}

#[test]
fn test_generation_is_deterministic() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);

    unit.generate().unwrap();
    let first = read_script(&unit);
    unit.generate().unwrap();
    assert_eq!(read_script(&unit), first);
}

#[test]
fn test_generation_fails_closed() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();
    let before = read_script(&unit);

    unit.set("DB", "load", "ghost.db, P=X:").unwrap();
    let err = unit.generate().unwrap_err();

    assert_eq!(
        err.diagnostic(),
        Some(&DiagnosticError::LoadFileNotFound("ghost.db".to_string()))
    );
    assert_eq!(read_script(&unit), before);
    assert_eq!(unit.state().status(), UnitStatus::Generated);
    assert_eq!(unit.state().current_state(), Severity::Warning);
    assert!(
        unit.state()
            .full_transcript()
            .contains("load directive invalid: file not found")
    );
}

#[test]
fn test_generation_failure_on_fresh_unit_writes_nothing() {
    let fixture = Fixture::new();
    let mut unit = fixture.repository.create_unit("alpha").unwrap();
    unit.set("IOC", "bin", "X").unwrap();
    unit.set("IOC", "module", "autosave, asyn").unwrap();

    let err = unit.generate().unwrap_err();
    assert_eq!(
        err.diagnostic(),
        Some(&DiagnosticError::UnknownModule("asyn".to_string()))
    );
    assert!(!unit.project_dir().exists());
}

#[test]
fn test_generate_check() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);

    let checked = unit.generate_check().unwrap();
    assert_eq!(checked.bin, "motorApp");
    assert_eq!(
        checked.modules,
        vec![Module::Stream, Module::Autosave, Module::Caputlog]
    );
    assert_eq!(
        checked.env,
        vec![("EPICS_CA_MAX_ARRAY_BYTES".to_string(), "1000000".to_string())]
    );
    assert!(!unit.project_dir().exists());

    unit.set("ENV", "epics_env", "NOT A BINDING").unwrap();
    assert!(matches!(
        unit.generate_check().unwrap_err().diagnostic(),
        Some(DiagnosticError::InvalidEnv(_))
    ));
}

#[test]
fn test_missing_protocol_file() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    fs::remove_file(unit.src_dir().join("dev.proto")).unwrap();

    let err = unit.generate().unwrap_err();
    assert_eq!(
        err.diagnostic(),
        Some(&DiagnosticError::ProtocolFileMissing("dev.proto".to_string()))
    );
}

#[test]
fn test_file_copy_entries() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.set(
        "RAW",
        "file_copy",
        "src/init.cmd:startup/init.cmd:rx; template/common/access.acf:startup/access.acf",
    )
    .unwrap();
    unit.generate().unwrap();

    let project = unit.project_dir();
    assert_eq!(mode(&project.join("startup/init.cmd")), 0o555);
    assert_eq!(mode(&project.join("startup/access.acf")), 0o644);
    assert_eq!(
        fs::read_to_string(project.join("startup/init.cmd")).unwrap(),
        "dbpf alpha:INIT 1\n"
    );
}

#[test]
fn test_file_copy_root_restricted() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);

    for entry in [
        "/etc/passwd:startup/passwd",
        "src/../ioc.ini:startup/ioc.ini",
        "src/init.cmd:../outside.cmd",
        "src/init.cmd:startup/init.cmd:z",
        "src/missing.cmd:startup/missing.cmd",
    ] {
        unit.set("RAW", "file_copy", entry).unwrap();
        let err = unit.generate().unwrap_err();
        assert!(
            matches!(err.diagnostic(), Some(DiagnosticError::InvalidFileCopy { .. })),
            "{entry} should be rejected, got {err}"
        );
    }
    assert!(!unit.project_dir().exists());
    assert!(!unit.dir().join("outside.cmd").exists());
}

#[test]
fn test_regeneration_keeps_other_faults() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);

    // A lost source file is an error that generation must not clear
    fs::remove_file(unit.src_dir().join("init.cmd")).unwrap();
    let report = unit.collect_sources(None).unwrap();
    assert_eq!(report.lost, vec!["init.cmd"]);
    assert_eq!(unit.state().current_state(), Severity::Error);

    unit.generate().unwrap();
    assert_eq!(unit.state().status(), UnitStatus::Generated);
    assert_eq!(unit.state().current_state(), Severity::Error);

    unit.reset_state();
    assert_eq!(unit.state().current_state(), Severity::Normal);
}

#[test]
fn test_export_policies() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();

    assert_eq!(unit.export(true).unwrap(), ExportPolicy::Create);
    let export_dir = unit.export_dir();
    fs::write(export_dir.join("settings/autosave/alpha-settings.sav"), "saved").unwrap();
    fs::write(export_dir.join("log/alpha.info"), "running").unwrap();

    unit.set("IOC", "description", "incremental").unwrap();
    unit.generate().unwrap();
    assert_eq!(unit.export(false).unwrap(), ExportPolicy::Incremental);
    assert!(export_dir.join("settings/autosave/alpha-settings.sav").is_file());
    assert!(export_dir.join("log/alpha.info").is_file());
    assert!(
        fs::read_to_string(export_dir.join("ioc.ini"))
            .unwrap()
            .contains("incremental")
    );

    assert_eq!(unit.export(true).unwrap(), ExportPolicy::FullOverwrite);
    assert!(!export_dir.join("settings/autosave/alpha-settings.sav").exists());
    assert!(!export_dir.join("log/alpha.info").exists());
    assert!(export_dir.join("startup/st.cmd").is_file());
}

#[test]
fn test_export_refused_when_not_normal() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();

    fs::remove_file(unit.src_dir().join("init.cmd")).unwrap();
    unit.collect_sources(None).unwrap();
    let transcript = unit.state().full_transcript().to_string();

    let err = unit.export(false).unwrap_err();
    assert_eq!(
        err.diagnostic(),
        Some(&DiagnosticError::ExportStateNotNormal(Severity::Error))
    );
    assert!(!unit.export_dir().exists());
    assert_eq!(unit.state().full_transcript(), transcript);
}

#[test]
fn test_failed_regeneration_keeps_startup_tree() {
    let fixture = Fixture::new();
    let mut unit = full_unit(&fixture);
    unit.generate().unwrap();
    let before = read_script(&unit);

    unit.set("RAW", "file_copy", "src/init.cmd:log").unwrap();
    assert!(matches!(
        unit.generate_check().unwrap_err().diagnostic(),
        Some(DiagnosticError::InvalidFileCopy { .. })
    ));
    assert!(unit.generate().is_err());
    assert_eq!(read_script(&unit), before);
    assert!(unit.project_dir().join("log").is_dir());

    // Passes the checks but cannot be written over an existing directory
    fs::create_dir_all(unit.project_dir().join("opi")).unwrap();
    unit.set("RAW", "file_copy", "src/init.cmd:opi").unwrap();
    unit.generate_check().unwrap();
    let err = unit.generate().unwrap_err();
    assert!(matches!(err.diagnostic(), Some(DiagnosticError::Io { .. })));

    assert_eq!(read_script(&unit), before);
    assert!(unit.project_dir().join("startup/db/motor.db").is_file());
    assert!(unit.project_dir().join("opi").is_dir());
    assert_eq!(unit.state().status(), UnitStatus::Generated);
}
