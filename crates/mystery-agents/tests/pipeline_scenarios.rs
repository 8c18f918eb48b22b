//! End-to-end pipeline scenarios against a scripted chat backend.
//!
//! The backend answers by matching distinctive fragments of each agent's
//! system prompt, so a whole run executes without a live model. Prose
//! batches are synthesized per request to honor the asked-for chapter range
//! and word budget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use fairplay::model::{
    ArtifactType, PrimaryAxis, ProjectStatus, RunStatus, RunStep, TargetLength,
};
use fairplay::{ArtifactStore, MemoryStore, PipelineConfig};
use mystery_agents::{
    AgentsConfig, BackendError, ChatBackend, ChatCompletion, ChatRequest, CmlMode, LlmEndpoint,
    PipelineService, SpecDraft,
};

const CULPRIT: &str = "Edwin";
const NON_CULPRITS: [&str; 5] = ["Mary", "Col. Brace", "Dr. Quill", "Lavinia", "Parsons"];
const REVEAL_CHAPTER: u32 = 16;
const CHAPTERS: u32 = 18;

// ── Fixture payloads ────────────────────────────────────────────────

fn setting_response() -> String {
    json!({
        "decade": "1930s",
        "location": "Harwood Hall",
        "description": "A flint-and-brick country house on the Cambridgeshire fens, reached by a single causeway and ringed by drainage channels. The household runs to the minute: bells for meals, the wireless at nine, lamps trimmed by the chauffeur before the family retires. Winter floods have closed the causeway and the house keeps its own company, which suits everyone except the guests.",
        "period_anchors": ["a wireless set in the morning room", "the bell-pull board in the servants' passage"],
        "anachronisms": [],
        "implausibilities": []
    })
    .to_string()
}

fn cast_response() -> String {
    let roles = [
        (CULPRIT, "nephew"),
        ("Mary", "housekeeper"),
        ("Col. Brace", "retired colonel"),
        ("Dr. Quill", "family physician"),
        ("Lavinia", "visiting cousin"),
        ("Parsons", "chauffeur"),
    ];
    let suspects: Vec<_> = roles
        .iter()
        .map(|(name, role)| {
            json!({
                "name": name,
                "role": role,
                "public_face": format!("{name} keeps an easy, unremarkable manner about the house."),
                "hidden_pressure": format!("{name} carries a private debt nobody at Harwood suspects.")
            })
        })
        .collect();
    json!({"suspects": suspects, "stereotype_check": []}).to_string()
}

fn location_response() -> String {
    json!({
        "name": "Harwood Hall",
        "zones": [
            {"name": "library", "access": "private"},
            {"name": "morning room", "access": "restricted"},
            {"name": "terrace", "access": "public"}
        ],
        "choke_points": ["the main stair", "the causeway gate"],
        "seclusion": "isolated"
    })
    .to_string()
}

fn temporal_response() -> String {
    json!({
        "era_markers": ["the nine o'clock wireless bulletin"],
        "daily_rhythm": [
            {"label": "breakfast", "start_hour": 8, "activity": "household gathers"},
            {"label": "dinner", "start_hour": 19, "activity": "formal meal"},
            {"label": "wireless hour", "start_hour": 21, "activity": "family in the morning room"},
            {"label": "lights out", "start_hour": 23, "activity": "house retires"}
        ],
        "key_intervals": ["the forty minutes between dinner and the wireless"]
    })
    .to_string()
}

fn social_response() -> String {
    json!({
        "hierarchies": ["family over guests over staff"],
        "tensions": [
            {"between": [CULPRIT, "Lavinia"], "kind": "financial", "note": "the will favors whoever stays in favor"},
            {"between": ["Col. Brace", "Dr. Quill"], "kind": "professional", "note": "an old dispute over a pension board"}
        ],
        "norms": ["no business talk at table"]
    })
    .to_string()
}

fn institution_response() -> String {
    json!({
        "institutions": [
            {"name": "county constabulary", "kind": "police", "authority_figure": "Inspector Dole"},
            {"name": "Harwood estate", "kind": "estate", "authority_figure": "the late Sir Julius"}
        ],
        "procedures": ["an inquest must open within the week"]
    })
    .to_string()
}

fn devices_response() -> String {
    json!({
        "devices": [
            {"id": "d-clock", "principle": "chronometric", "surface_appearance": "the mantel clock agreed with the hall regulator", "underlying_reality": "the mantel clock had been set eleven minutes fast that morning", "fair_play_clues": ["the winding log in the nephew's hand"], "anti_trope_note": "the clock is wrong by design, not by coincidence"},
            {"id": "d-echo", "principle": "acoustic", "surface_appearance": "the shot was heard in the morning room at ten", "underlying_reality": "the chimney carries sound from the gun room with a flat echo", "fair_play_clues": ["the colonel remarks that the fens flatten every report"], "anti_trope_note": "no gramophone record of a gunshot"},
            {"id": "d-ledger", "principle": "documentary", "surface_appearance": "the housekeeper's ledger seems routine", "underlying_reality": "its hourly initials fix the true timetable of the evening", "fair_play_clues": ["the ledger sits open on the kitchen table in chapter two"], "anti_trope_note": "the document proves innocence, not guilt"}
        ]
    })
    .to_string()
}

fn cml_response() -> String {
    let constraints: Vec<_> = (1..=4)
        .map(|i| {
            json!({
                "id": format!("k{i}"),
                "description": format!("Constraint {i}: a fixed fact of the household evening."),
                "binds": []
            })
        })
        .collect();
    json!({
        "meta": {"title": "The Harwood Affair", "decade": "1930s", "location_preset": "CountryHouse", "tone": "Cozy", "theme": "", "primary_axis": "temporal", "target_length": "medium", "case_class": "murder"},
        "surface_model": {"summary": "Sir Julius shot in the gun room at ten o'clock, while every guest sat in the morning room.", "apparent_case_class": "murder", "observed_timeline": ["dinner at seven", "the shot at ten"], "assumed_facts": ["the mantel clock kept true time"]},
        "hidden_model": {"summary": "The shot came at eleven minutes to ten; the mantel clock lied for its winder.", "true_sequence": ["the clock set forward at breakfast", "the shot before the wireless hour"], "culprit": CULPRIT, "motive_core": "the will would change on Monday"},
        "false_assumption": {"statement": "The shot heard at ten fixed the time of death.", "assumption_type": "time_anchor", "collapse_effect": "Every alibi anchored to ten o'clock covers the wrong interval."},
        "constraint_space": {"constraints": constraints},
        "inference_path": [
            {"index": 0, "premise": "The mantel clock disagrees with the station clock by eleven minutes.", "conclusion": "The household's ten o'clock is suspect."},
            {"index": 1, "premise": "Only the nephew wound and set the mantel clock.", "conclusion": "The anchor was in one suspect's control."},
            {"index": 2, "premise": "His alibi begins precisely at the false ten.", "conclusion": "The alibi covers the wrong minutes."}
        ],
        "discriminating_test": {"design": "Re-enact the evening with the mantel clock corrected to station time.", "method": "reenactment", "observable_outcome": "Only one account of the evening fails to fit the corrected timetable.", "excludes": NON_CULPRITS},
        "fair_play": {"guarantees": ["every clue is shown before the reveal", "no identical twins, no unknown poisons"], "reader_visibility": "clues surface in open narration"},
        "quality_controls": {"anti_trope_notes": ["the butler is nobody"], "difficulty_notes": ["medium"]}
    })
    .to_string()
}

fn validation_response() -> String {
    let rules = [
        "structural_integrity",
        "axis_dominance",
        "epistemic_integrity",
        "false_assumption_test",
        "inference_path_validity",
        "discriminating_test_soundness",
        "fair_play_guarantees",
    ];
    let checklist: Vec<_> = rules
        .iter()
        .map(|r| json!({"rule": r, "passed": true, "note": ""}))
        .collect();
    json!({"passed": true, "checklist": checklist, "repair_directives": []}).to_string()
}

fn profiles_response() -> String {
    let mut names = vec![CULPRIT];
    names.extend(NON_CULPRITS);
    let profiles: Vec<_> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "outward_manner": format!("{name} is all surface calm."),
                "private_history": format!("{name} came to Harwood with more past than luggage."),
                "knowledge_of_crime": if *name == CULPRIT { "full" } else { "none" },
                "voice_notes": ["clipped", "period idiom"]
            })
        })
        .collect();
    json!({"profiles": profiles}).to_string()
}

fn clue(id: &str, description: &str, reveal: u32) -> serde_json::Value {
    json!({
        "id": id,
        "description": description,
        "reveal_chapter": reveal,
        "essential": false,
        "supports_inference_step": null,
        "eliminates_suspect": null,
        "supports_false_assumption": false,
        "contradicts_false_assumption": false,
        "references_false_assumption": false,
        "references_discriminating_test": false,
        "observed_by": "the assembled household"
    })
}

fn clues_response() -> String {
    let mut clues = Vec::new();
    for (i, reveal) in [(0u32, 3u32), (1, 5), (2, 7)] {
        let mut c = clue(
            &format!("c-step{i}"),
            "A small discrepancy of the household timetable, visible to anyone who looks.",
            reveal,
        );
        c["supports_inference_step"] = json!(i);
        c["essential"] = json!(true);
        clues.push(c);
    }
    for (i, name) in NON_CULPRITS.iter().enumerate() {
        let mut c = clue(
            &format!("c-elim{i}"),
            "A fixed point of the evening that places one guest beyond suspicion entirely.",
            6 + i as u32,
        );
        c["eliminates_suspect"] = json!(name);
        clues.push(c);
    }
    let mut support = clue(
        "c-support",
        "The hall regulator agrees with the mantel clock, for anyone who checks at nine.",
        4,
    );
    support["supports_false_assumption"] = json!(true);
    clues.push(support);
    let mut contra = clue(
        "c-contra",
        "The station master's pocket watch tells a different ten o'clock than Harwood keeps.",
        11,
    );
    contra["contradicts_false_assumption"] = json!(true);
    contra["references_false_assumption"] = json!(true);
    clues.push(contra);
    let mut test_ref = clue(
        "c-test",
        "Inspector Dole wonders aloud what the evening would look like on corrected time.",
        12,
    );
    test_ref["references_discriminating_test"] = json!(true);
    clues.push(test_ref);
    json!({"clues": clues}).to_string()
}

fn fair_play_pass_response() -> String {
    let rules = ["all_clues_pre_reveal", "no_private_knowledge", "inference_walkable", "test_observable"];
    let checklist: Vec<_> = rules
        .iter()
        .map(|r| json!({"rule": r, "passed": true, "note": ""}))
        .collect();
    json!({"overall": "pass", "checklist": checklist, "violations": [], "recommendations": []})
        .to_string()
}

fn fair_play_structural_fail_response() -> String {
    json!({
        "overall": "fail",
        "checklist": [
            {"rule": "all_clues_pre_reveal", "passed": true, "note": ""},
            {"rule": "no_private_knowledge", "passed": true, "note": ""},
            {"rule": "inference_walkable", "passed": false, "note": "steps reference no concrete object"},
            {"rule": "test_observable", "passed": true, "note": ""}
        ],
        "violations": [{"class": "inference_path_abstract", "detail": "inference steps are abstract assertions"}],
        "recommendations": ["anchor each inference step in a physical object"]
    })
    .to_string()
}

fn blind_reader_response() -> String {
    json!({
        "identified": true,
        "suspect": CULPRIT,
        "confidence": "likely",
        "reasoning": "only one suspect controlled the clock the alibis hang on"
    })
    .to_string()
}

fn outline_response() -> String {
    let mut chapters = Vec::new();
    for n in 1..=CHAPTERS {
        let mut scenes = vec![json!({
            "summary": format!("Chapter {n}: the investigation advances through the household."),
            "clues_revealed": clue_ids_for_chapter(n)
        })];
        if n == 9 {
            for name in NON_CULPRITS.iter().take(3) {
                scenes.push(json!({
                    "summary": format!("{name} is ruled out when the ledger provides evidence of their whereabouts."),
                    "clues_revealed": []
                }));
            }
        }
        if n == 13 {
            for name in NON_CULPRITS.iter().skip(3) {
                scenes.push(json!({
                    "summary": format!("{name} is cleared on the evidence of the gatehouse log."),
                    "clues_revealed": []
                }));
            }
        }
        if n == 15 {
            scenes.push(json!({
                "summary": "Inspector Dole stages the re-enactment on corrected time; the evidence excludes every innocent account.",
                "clues_revealed": []
            }));
        }
        chapters.push(json!({
            "number": n,
            "title": format!("Chapter {n}"),
            "scenes": scenes,
            "word_target": 2600
        }));
    }
    json!({"chapters": chapters, "reveal_chapter": REVEAL_CHAPTER}).to_string()
}

fn clue_ids_for_chapter(n: u32) -> Vec<String> {
    match n {
        3 => vec!["c-step0".into()],
        5 => vec!["c-step1".into()],
        7 => vec!["c-step2".into()],
        11 => vec!["c-contra".into()],
        _ => vec![],
    }
}

/// Synthesize one prose chapter of roughly 2,600 words.
fn chapter_text(n: u32, drift: bool) -> String {
    let filler = "The house kept its counsel through the long hours, and the fens said nothing at all. ";
    let mut text = filler.repeat(170);
    if n == 9 {
        for name in NON_CULPRITS {
            text.push_str(&format!(
                "{name} was ruled out that afternoon; the evidence of the ledger was plain. "
            ));
        }
    }
    if n == 15 {
        text.push_str(
            "They staged the re-enactment on corrected time, and the evidence ruled out every innocent account of the evening. ",
        );
    }
    if n == REVEAL_CHAPTER {
        text.push_str(&format!(
            "It was {CULPRIT} who had wound the clock forward, {CULPRIT} whose evening only fit the false ten. "
        ));
    }
    if n > REVEAL_CHAPTER {
        if drift {
            text.push_str("The nephew said nothing on the drive to the assizes; the nephew never would. ");
        } else {
            text.push_str(&format!(
                "{CULPRIT} said nothing on the drive to the assizes; {CULPRIT} never would. "
            ));
        }
    }
    text
}

fn prose_response(numbers: &[u32], drift: bool) -> String {
    let chapters: Vec<_> = numbers
        .iter()
        .map(|n| {
            json!({
                "number": n,
                "title": format!("Chapter {n}"),
                "text": chapter_text(*n, drift),
                "word_count": 0
            })
        })
        .collect();
    json!({"chapters": chapters, "reveal_chapter": REVEAL_CHAPTER}).to_string()
}

fn synopsis_response() -> String {
    json!({
        "hook": "A house sealed by floodwater. A shot everyone heard. A clock nobody doubted.",
        "premise": "When Sir Julius is found dead in the gun room, every guest has an alibi for ten o'clock.",
        "spoiler_free_summary": "An inspector with a taste for timetables unpicks an evening the whole household agrees on, in a classic puzzle of minutes and motive."
    })
    .to_string()
}

fn novelty_response(top: f64) -> String {
    let seeds = [
        "seed-altered-clock",
        "seed-twin-substitution",
        "seed-sealed-room",
        "seed-forged-verdict",
        "seed-habitual-dose",
        "seed-borrowed-alibi",
    ];
    let comparisons: Vec<_> = seeds
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let v = if i == 0 { top } else { 0.2 };
            json!({"seed_id": id, "axis": v, "mechanism": v, "false_assumption": v, "test_method": v, "era": v, "location": v})
        })
        .collect();
    json!({"comparisons": comparisons}).to_string()
}

// ── Scripted backend ────────────────────────────────────────────────

/// Dispatches on system-prompt fragments. Per-marker override queues are
/// consumed before the standing default; prose is synthesized per request.
struct MarkerBackend {
    overrides: Mutex<HashMap<&'static str, Vec<String>>>,
    drift_prose: AtomicBool,
}

impl MarkerBackend {
    fn new() -> Self {
        Self {
            overrides: Mutex::new(HashMap::new()),
            drift_prose: AtomicBool::new(false),
        }
    }

    fn queue(&self, marker: &'static str, response: String) {
        self.overrides
            .lock()
            .unwrap()
            .entry(marker)
            .or_default()
            .push(response);
    }

    fn take_override(&self, marker: &'static str) -> Option<String> {
        let mut map = self.overrides.lock().unwrap();
        match map.get_mut(marker) {
            Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
            _ => None,
        }
    }

    fn prose_for(&self, user: &str) -> String {
        // "Write chapters 4-6 of the novel." or "Write chapters 16 ..."
        let range = user
            .split("Write chapters ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("1");
        let numbers: Vec<u32> = match range.split_once('-') {
            Some((a, b)) => {
                let (a, b) = (a.parse().unwrap_or(1), b.parse().unwrap_or(1));
                (a..=b).collect()
            }
            None => vec![range.parse().unwrap_or(1)],
        };
        // A release-gate repair batch carries a "Repair pass" section; the
        // full drift regeneration carries the name-the-culprit directive.
        let corrected = user.contains("Repair pass") || user.contains("refer to the culprit");
        let drift = self.drift_prose.load(Ordering::SeqCst) && !corrected;
        prose_response(&numbers, drift)
    }
}

#[async_trait]
impl ChatBackend for MarkerBackend {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatCompletion, BackendError> {
        let markers: [(&'static str, fn() -> String); 13] = [
            ("period settings", setting_response),
            ("cast suspects", cast_response),
            ("crime-scene geography", location_response),
            ("temporal texture", temporal_response),
            ("social web", social_response),
            ("institutions whose authority", institution_response),
            ("hard-logic devices", devices_response),
            ("complete case model", cml_response),
            ("audit case models", validation_response),
            ("deepen suspects", profiles_response),
            ("clue cards", clues_response),
            ("careful mystery reader", blind_reader_response),
            ("back-cover copy", synopsis_response),
        ];

        let text = if req.system.contains("detective prose") {
            self.prose_for(&req.user)
        } else if req.system.contains("audit clue sets") {
            self.take_override("audit clue sets")
                .unwrap_or_else(fair_play_pass_response)
        } else if req.system.contains("seed patterns") {
            self.take_override("seed patterns")
                .unwrap_or_else(|| novelty_response(0.2))
        } else {
            markers
                .iter()
                .find(|(marker, _)| req.system.contains(marker))
                .map(|(marker, default)| self.take_override(marker).unwrap_or_else(default))
                .unwrap_or_else(|| "{}".to_string())
        };

        Ok(ChatCompletion {
            text,
            input_tokens: 400,
            output_tokens: 800,
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

fn endpoint() -> LlmEndpoint {
    LlmEndpoint {
        url: "http://scripted.invalid/v1".into(),
        api_key: "test-key".into(),
        model: "gpt-4o-mini".into(),
    }
}

fn service_with(backend: Arc<MarkerBackend>) -> PipelineService {
    let agents_config = AgentsConfig {
        endpoint: Some(endpoint()),
        ..AgentsConfig::default()
    };
    PipelineService::new(
        Arc::new(MemoryStore::new()),
        PipelineConfig::default(),
        agents_config,
    )
    .with_backend(backend)
}

fn medium_spec() -> SpecDraft {
    SpecDraft {
        decade: "1930s".into(),
        location_preset: "CountryHouse".into(),
        tone: "Cozy".into(),
        theme: String::new(),
        cast_size: 6,
        cast_names: vec![],
        primary_axis: PrimaryAxis::Temporal,
        target_length: TargetLength::Medium,
    }
}

fn steps_of(events: &[fairplay::model::RunEvent]) -> Vec<RunStep> {
    events.iter().map(|e| e.step).collect()
}

/// Assert `expected` appears as an ordered subsequence of `steps`.
fn assert_subsequence(steps: &[RunStep], expected: &[RunStep]) {
    let mut cursor = 0;
    for step in steps {
        if cursor < expected.len() && *step == expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected.len(),
        "missing {:?} in {steps:?}",
        &expected[cursor..]
    );
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn s1_happy_path_medium() {
    let backend = Arc::new(MarkerBackend::new());
    let svc = service_with(backend);
    let project = svc.create_project("harwood").unwrap();
    let spec = svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    assert_subsequence(
        &steps_of(&events),
        &[
            RunStep::SettingDone,
            RunStep::CastDone,
            RunStep::BackgroundContextDone,
            RunStep::HardLogicDevicesDone,
            RunStep::CmlDone,
            RunStep::CmlValidated,
            RunStep::CharacterProfilesDone,
            RunStep::NoveltyAuditDone,
            RunStep::CluesDone,
            RunStep::FairPlayReportDone,
            RunStep::OutlineDone,
            RunStep::ProseDone,
            RunStep::ReleaseGate,
            RunStep::RunFinished,
        ],
    );

    // Outline chapter count ≈ 18 ±2.
    let outline = svc
        .latest_artifact(&project.id, ArtifactType::Outline, CmlMode::User)
        .unwrap();
    let chapter_count = outline.payload["chapters"].as_array().unwrap().len() as i64;
    assert!((16..=20).contains(&chapter_count));

    // Prose word count in [40000, 60000].
    let prose: fairplay::case::Prose = serde_json::from_value(
        svc.latest_artifact(&project.id, ArtifactType::ProseMedium, CmlMode::User)
            .unwrap()
            .payload,
    )
    .unwrap();
    let words = prose.total_words();
    assert!(
        (40_000..=60_000).contains(&words),
        "word count {words} out of range"
    );

    // Report passed=true.
    let report = outcome.report.expect("report present");
    assert!(report.passed, "phases: {:#?}", report.phases);
    assert!(report.total_cost > 0.0);

    // Dependency closure: every artifact carries the run's spec id.
    for artifact_type in ArtifactType::ALL {
        for record in svc
            .store()
            .artifact_versions(&project.id, artifact_type)
            .unwrap()
        {
            assert_eq!(record.source_spec_id, spec.id, "{artifact_type} spec drift");
        }
    }

    // Event-artifact causality: every *_done version is readable via latest.
    for event in &events {
        if let Some(version) = event.payload.get("version").and_then(|v| v.as_u64()) {
            let artifact_type = match event.step {
                RunStep::SettingDone => Some(ArtifactType::Setting),
                RunStep::CastDone => Some(ArtifactType::Cast),
                RunStep::CmlDone => Some(ArtifactType::Cml),
                RunStep::CluesDone => Some(ArtifactType::Clues),
                RunStep::OutlineDone => Some(ArtifactType::Outline),
                RunStep::ProseDone => Some(ArtifactType::ProseMedium),
                _ => None,
            };
            if let Some(t) = artifact_type {
                let latest = svc.store().latest_artifact(&project.id, t).unwrap().unwrap();
                assert!(u64::from(latest.version) >= version);
            }
        }
    }

    // Monotonic, gap-free versions.
    for artifact_type in ArtifactType::ALL {
        let versions: Vec<u32> = svc
            .store()
            .artifact_versions(&project.id, artifact_type)
            .unwrap()
            .iter()
            .map(|a| a.version)
            .collect();
        let expected: Vec<u32> = (1..=versions.len() as u32).collect();
        assert_eq!(versions, expected, "{artifact_type} versions");
    }

    // The project is idle again and the game pack is a documented stub.
    assert_eq!(
        svc.get_project(&project.id).unwrap().status,
        ProjectStatus::Idle
    );
    let pack = svc
        .latest_artifact(&project.id, ArtifactType::GamePack, CmlMode::User)
        .unwrap();
    assert_eq!(pack.payload["status"], "not_implemented");
}

#[tokio::test]
async fn s2_novelty_retry() {
    let backend = Arc::new(MarkerBackend::new());
    // First audit: structural echo above threshold. Second: diverged.
    backend.queue("seed patterns", novelty_response(0.95));
    backend.queue("seed patterns", novelty_response(0.2));
    let svc = service_with(backend);
    let project = svc.create_project("novelty").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    let steps = steps_of(&events);
    assert!(steps.iter().filter(|s| **s == RunStep::NoveltyMath).count() >= 2);
    assert_eq!(steps.iter().filter(|s| **s == RunStep::CmlRetry).count(), 1);
    let audit_done = events
        .iter()
        .find(|e| e.step == RunStep::NoveltyAuditDone)
        .unwrap();
    assert_eq!(audit_done.payload["status"], "pass");

    // The retried CML is version 2 and `latest` returns it.
    let cml = svc
        .latest_artifact(&project.id, ArtifactType::Cml, CmlMode::Expert)
        .unwrap();
    assert_eq!(cml.version, 2);
}

#[tokio::test]
async fn s3_fair_play_structural_escalation() {
    let backend = Arc::new(MarkerBackend::new());
    backend.queue("audit clue sets", fair_play_structural_fail_response());
    // Second audit (after CML revision + clue regen) passes via default.
    let svc = service_with(backend);
    let project = svc.create_project("structural").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    assert_subsequence(
        &steps_of(&events),
        &[
            RunStep::FairPlayReportDone,
            RunStep::CmlRevision,
            RunStep::CmlValidated,
            RunStep::CluesDone,
            RunStep::FairPlayReportDone,
        ],
    );

    // The revision produced new CML and clue versions.
    let cml = svc
        .latest_artifact(&project.id, ArtifactType::Cml, CmlMode::Advanced)
        .unwrap();
    assert!(cml.version >= 2);
    let clues = svc
        .latest_artifact(&project.id, ArtifactType::Clues, CmlMode::User)
        .unwrap();
    assert!(clues.version >= 2);
}

#[tokio::test]
async fn s3b_persistent_structural_failure_aborts() {
    let backend = Arc::new(MarkerBackend::new());
    backend.queue("audit clue sets", fair_play_structural_fail_response());
    backend.queue("audit clue sets", fair_play_structural_fail_response());
    let svc = service_with(backend);
    let project = svc.create_project("persistent").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    let failed = events.last().unwrap();
    assert_eq!(failed.step, RunStep::RunFailed);
    assert!(failed.message.contains("persistent_fair_play"));
}

#[tokio::test]
async fn s4_prose_identity_drift_repair() {
    let backend = Arc::new(MarkerBackend::new());
    backend.drift_prose.store(true, Ordering::SeqCst);
    let svc = service_with(backend);
    let project = svc.create_project("drift").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded, "release gate passes after repair");

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    assert!(steps_of(&events).contains(&RunStep::ProseBatchRepair));
    let repair_event = events
        .iter()
        .find(|e| e.step == RunStep::ProseBatchRepair)
        .unwrap();
    assert_eq!(repair_event.payload["scope"], "full");

    // The full regeneration is version 2 and post-reveal chapters name the
    // culprit.
    let prose = svc
        .latest_artifact(&project.id, ArtifactType::ProseMedium, CmlMode::User)
        .unwrap();
    assert_eq!(prose.version, 2);
    let typed: fairplay::case::Prose = serde_json::from_value(prose.payload).unwrap();
    let last = typed.chapters.last().unwrap();
    assert!(last.text.contains(CULPRIT));
}

#[tokio::test]
async fn s5_missing_credentials_fails_fast() {
    let svc = PipelineService::new(
        Arc::new(MemoryStore::new()),
        PipelineConfig::default(),
        AgentsConfig::default(),
    );
    let project = svc.create_project("no-creds").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let err = svc.start_run(&project.id).await.unwrap_err();
    assert_eq!(err.http_status(), 503);
    assert!(svc.store().list_runs(&project.id).unwrap().is_empty());
    assert_eq!(
        svc.get_project(&project.id).unwrap().status,
        ProjectStatus::Idle
    );
}

#[tokio::test]
async fn s6_concurrent_run_rejected() {
    let backend = Arc::new(MarkerBackend::new());
    let svc = service_with(backend);
    let project = svc.create_project("busy").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    // Simulate an in-flight run.
    let mut running = svc.get_project(&project.id).unwrap();
    running.status = ProjectStatus::Running;
    svc.store().put_project(&running).unwrap();

    let err = svc.start_run(&project.id).await.unwrap_err();
    assert_eq!(err.http_status(), 409);
    assert!(svc.store().list_runs(&project.id).unwrap().is_empty());
}

#[tokio::test]
async fn s7_json_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mysteries.json");

    let project_id;
    let run_id;
    {
        let backend = Arc::new(MarkerBackend::new());
        let agents_config = AgentsConfig {
            endpoint: Some(endpoint()),
            ..AgentsConfig::default()
        };
        let svc = PipelineService::new(
            Arc::new(fairplay::JsonFileStore::open(&path).unwrap()),
            PipelineConfig::default(),
            agents_config,
        )
        .with_backend(backend);
        let project = svc.create_project("durable").unwrap();
        project_id = project.id.clone();
        svc.store_spec(&project.id, medium_spec()).unwrap();
        let outcome = svc.start_run(&project.id).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Succeeded);
        run_id = outcome.run_id;
    }

    // "Restart": a fresh store handle over the same file.
    let store = fairplay::JsonFileStore::open(&path).unwrap();
    let prose = store
        .latest_artifact(&project_id, ArtifactType::ProseMedium)
        .unwrap()
        .unwrap();
    assert!(prose.version >= 1);
    let events = store.events_since(&run_id, 0).unwrap();
    assert_eq!(events.last().unwrap().step, RunStep::RunFinished);

    // An interrupted run is failed on reopen, not resumed.
    let run = fairplay::model::Run::new(&project_id, "spec-x", 0.15);
    let interrupted_id = run.id.clone();
    store.put_run(&run).unwrap();
    drop(store);
    let store = fairplay::JsonFileStore::open(&path).unwrap();
    assert_eq!(
        store.get_run(&interrupted_id).unwrap().unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn blind_reader_failure_regenerates_clues() {
    let backend = Arc::new(MarkerBackend::new());
    backend.queue(
        "careful mystery reader",
        json!({"identified": false, "suspect": null, "confidence": "impossible", "reasoning": "the clues never fix the timetable"}).to_string(),
    );
    let svc = service_with(backend);
    let project = svc.create_project("unsolvable").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);

    let events = svc.run_events(&outcome.run_id, 0).unwrap();
    let blind_events = events
        .iter()
        .filter(|e| e.step == RunStep::BlindReader)
        .count();
    assert_eq!(blind_events, 2, "verdict recorded before and after the retry");
    let clues = svc
        .latest_artifact(&project.id, ArtifactType::Clues, CmlMode::User)
        .unwrap();
    assert!(clues.version >= 2);
}

#[tokio::test]
async fn report_endpoints_cover_history_and_aggregate() {
    let backend = Arc::new(MarkerBackend::new());
    let svc = service_with(backend);
    let project = svc.create_project("reports").unwrap();
    svc.store_spec(&project.id, medium_spec()).unwrap();

    let outcome = svc.start_run(&project.id).await.unwrap();
    let report = svc.run_report(&project.id, &outcome.run_id).unwrap();
    assert!(report.passed);

    let history = svc.report_history(&project.id, 10).unwrap();
    assert_eq!(history.len(), 1);

    let aggregate = svc.aggregate_reports().unwrap();
    assert_eq!(aggregate.reports, 1);
    assert_eq!(aggregate.passed, 1);
    assert!(aggregate.mean_overall_score > 60.0);
}
