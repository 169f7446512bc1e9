use chrono::{NaiveDate, Utc};
use dealgate_core::{
    confirm_pending_move, plan_stage_move, stage, weighted_value, ChecklistConfirmation,
    GateError, Opportunity, OpportunityDraft, PortfolioMetrics, ScaleSet, StageMove,
};
use serde_json::json;
use uuid::Uuid;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
}

fn deal_a() -> Opportunity {
    OpportunityDraft::new("Deal A", "Acme", 100_000.0)
        .validate("Jordi", NaiveDate::from_ymd_opt(2026, 9, 30).unwrap())
        .expect("valid draft")
        .into_opportunity(Uuid::new_v4(), Utc::now())
}

#[test]
fn new_deal_needs_checklist_to_reach_qualification() {
    let mut opp = deal_a();
    assert_eq!(opp.stage, 1);
    assert_eq!(opp.probability, 0.0);
    assert_eq!(opp.scales, Some(ScaleSet::zeroed()));

    let StageMove::RequiresChecklist(pending) = plan_stage_move(&opp, 2, today()).unwrap() else {
        panic!("zeroed scales must not pass the qualification gate");
    };
    assert_eq!(pending.checklist_stage().map(|s| s.id), Some(1));

    let partial: ChecklistConfirmation = [("first_contact".to_string(), true)].into_iter().collect();
    assert!(matches!(
        confirm_pending_move(&pending, &partial, today()),
        Err(GateError::ChecklistIncomplete { stage: 1, .. })
    ));

    let all = ChecklistConfirmation::confirm_all(stage(1).unwrap());
    let transition = confirm_pending_move(&pending, &all, today()).unwrap();
    opp.apply_transition(&transition);

    assert_eq!(opp.stage, 2);
    assert_eq!(opp.probability, 20.0);
    assert_eq!(opp.last_update, today());
}

#[test]
fn qualified_deal_moves_directly_and_reprices() {
    let mut opp = deal_a();
    opp.scales = Some(ScaleSet::from_scores([5, 4, 5, 0, 0, 0]));

    for (target, probability) in [(2u8, 20.0), (3, 40.0)] {
        let StageMove::Direct(transition) = plan_stage_move(&opp, target, today()).unwrap() else {
            panic!("gate for stage {target} should be met");
        };
        opp.apply_transition(&transition);
        assert_eq!(opp.probability, probability);
    }
    assert_eq!(weighted_value(&opp), 40_000.0);

    let StageMove::RequiresChecklist(pending) = plan_stage_move(&opp, 4, today()).unwrap() else {
        panic!("value gate is not met");
    };
    assert_eq!(pending.unmet.len(), 1);
}

#[test]
fn legacy_records_feed_the_same_gates() {
    let raw = json!({
        "id": Uuid::new_v4(),
        "name": "Legacy",
        "client": "Initech",
        "vendor": "Carlos",
        "value": 50000,
        "stage": 1,
        "created_at": "2025-11-02T10:00:00Z",
        "last_update": "2025-12-01",
        "probability": 0,
        "scales": {"dor": 7, "poder": 4.4, "visao": "n/a"}
    });
    let opp: Opportunity = serde_json::from_value(raw).unwrap();
    assert!(matches!(plan_stage_move(&opp, 2, today()), Ok(StageMove::Direct(_))));

    let metrics = PortfolioMetrics::compute(&[opp, deal_a()]);
    assert_eq!(metrics.count, 2);
    assert_eq!(metrics.stages[0].count, 2);
    assert_eq!(metrics.total_value, 150_000.0);
}
