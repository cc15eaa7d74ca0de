//! Parameter extraction through the correction loop, validation as the judge.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sim_coordination::extraction::{write_diagnostics, write_parameters, ParamValue};
use sim_coordination::{
    ContextAssembler, ContextBundle, CorrectionLoop, FailureCategory, GenerationError, Generator,
    ParameterJudge, ParameterSchema, TaskKind, TaskSpec,
};

struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<ContextBundle>>,
}

impl ScriptedGenerator {
    fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, GenerationError> {
        self.seen.lock().unwrap().push(bundle.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(GenerationError::EmptyResponse)
    }
}

fn document() -> serde_json::Value {
    json!({
        "genic": {
            "OutputDir": "output",
            "FileWithInputSpectrum": "powerspec.txt",
            "FileBase": "IC",
            "Nmesh": 256,
            "BoxSize": 100000.0,
            "Redshift": 127,
            "Omega0": 0.3,
            "OmegaLambda": 0.7,
            "HubbleParam": 0.7
        },
        "gadget": {
            "InitCondFile": "output/IC",
            "OutputDir": "output",
            "TimeMax": 1.0,
            "OutputList": "0.1,0.5,1.0",
            "Omega0": 0.3,
            "OmegaLambda": 0.7,
            "HubbleParam": 0.7,
            "BoxSize": 100000.0
        },
        "comment": "Fiducial run from table 1",
        "status": "complete"
    })
}

fn extraction_task(dir: &std::path::Path) -> TaskSpec {
    TaskSpec::builder(
        TaskKind::ParameterExtraction,
        "We run a 100 Mpc/h box with 256^3 particles from z = 127.",
        dir,
    )
    .budget(3)
    .build()
    .unwrap()
}

fn extraction_loop(replies: Vec<String>) -> CorrectionLoop<ScriptedGenerator, ParameterJudge> {
    CorrectionLoop::new(
        ScriptedGenerator::new(replies),
        ParameterJudge::new(Arc::new(ParameterSchema::mp_gadget())),
        ContextAssembler::new(),
    )
}

#[tokio::test]
async fn missing_redshift_is_fed_back_and_fixed() {
    let tmp = tempfile::tempdir().unwrap();
    let mut incomplete = document();
    incomplete["genic"]
        .as_object_mut()
        .unwrap()
        .remove("Redshift");
    let replies = vec![
        format!("Here you go:\n```json\n{}\n```", incomplete),
        document().to_string(),
    ];
    let looper = extraction_loop(replies);

    let report = looper.run(&extraction_task(tmp.path())).await;

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.result.attempt_count(), 2);
    let first = report.attempts[0].failure().unwrap();
    assert_eq!(first.category, FailureCategory::MissingField);
    assert!(first.message.contains("genic.Redshift is required"));

    let bundles = looper.generator().seen.lock().unwrap().clone();
    let diagnostic = bundles[1].diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.category, FailureCategory::MissingField);
    assert!(diagnostic.message.contains("genic.Redshift"));

    let params = report.artifact().unwrap();
    assert_eq!(
        params.section("genic").unwrap().get("Redshift"),
        Some(&ParamValue::Number(127.0))
    );
}

#[tokio::test]
async fn validated_parameters_are_written_per_section() {
    let tmp = tempfile::tempdir().unwrap();
    let looper = extraction_loop(vec![document().to_string()]);

    let report = looper.run(&extraction_task(tmp.path())).await;
    let params = report.artifact().unwrap();
    let files = write_parameters(params, tmp.path(), "paper", "paper.txt").unwrap();

    let genic = std::fs::read_to_string(files.param_file("genic").unwrap()).unwrap();
    assert!(genic.contains("Nmesh = 256\n"));
    assert!(genic.contains("Redshift = 127\n"));
    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(tmp.path().join("paper_gadget.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json["source"], "paper.txt");
    assert_eq!(json["parameters"]["OutputList"], "0.1,0.5,1.0");
}

#[tokio::test]
async fn implausible_values_exhaust_with_out_of_range() {
    let tmp = tempfile::tempdir().unwrap();
    let mut wrong_units = document();
    wrong_units["gadget"]["HubbleParam"] = json!(70);
    let replies = vec![wrong_units.to_string(); 3];
    let looper = extraction_loop(replies);

    let report = looper.run(&extraction_task(tmp.path())).await;

    assert!(!report.is_success());
    assert_eq!(report.attempts.len(), 3);
    let last = report.last_diagnostic().unwrap();
    assert_eq!(last.category, FailureCategory::OutOfRange);
    assert!(last.message.contains("gadget.HubbleParam"));

    let path = write_diagnostics(&report, tmp.path(), "paper").unwrap();
    assert!(path.ends_with("paper_diagnostics.json"));
    assert!(!tmp.path().join("paper.genic").exists());
}

#[tokio::test]
async fn prose_without_json_is_a_generation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let looper = extraction_loop(vec![
        "The paper does not state the box size.".to_string(),
        document().to_string(),
    ]);

    let report = looper.run(&extraction_task(tmp.path())).await;

    assert!(report.is_success());
    assert_eq!(
        report.attempts[0].failure().unwrap().category,
        FailureCategory::GenerationError
    );
}
