use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::{Decimal, dec};
use uuid::Uuid;

use crate::{
    config::TollgateConfig,
    db::tests::harness::create_test_db,
    events::{EventBus, ServerEvent},
    metering::CONSERVATIVE_ESTIMATE,
    models::{
        BillingEventFilter, BillingStatus, CostSource, CreatePriceRecord, PriceOrigin, UsageReport,
    },
    pricing::{ResolvedPrice, UnitPrices},
    services::{BillingError, BillingService},
};

async fn billing_with(config: TollgateConfig) -> BillingService {
    BillingService::from_config(create_test_db().await, &config, Arc::new(EventBus::new()))
        .await
        .unwrap()
}

async fn billing() -> BillingService {
    billing_with(TollgateConfig::default()).await
}

async fn funded_user(billing: &BillingService, points: i64) -> Uuid {
    let user = Uuid::new_v4();
    billing.ledger().credit(user, points).await.unwrap();
    user
}

async fn events_for(billing: &BillingService, user: Uuid) -> Vec<crate::models::BillingEvent> {
    billing
        .ledger()
        .history(&BillingEventFilter::for_user(user))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_operator_price_with_margin() {
    let billing = billing().await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("gpt-4", dec!(30), dec!(60)))
        .await
        .unwrap();
    billing.settings().set_margin_percent(25).await.unwrap();
    let user = funded_user(&billing, 1_000_000).await;

    let outcome = billing
        .process(user, UsageReport::new("gpt-4").with_units(1500, 800))
        .await
        .unwrap();

    assert_eq!(outcome.event.input_cost, dec!(56.25));
    assert_eq!(outcome.event.output_cost, dec!(60));
    assert_eq!(outcome.event.total_cost, dec!(116.25));
    assert_eq!(outcome.event.cost_source, CostSource::Catalog);
    assert_eq!(outcome.event.profit_margin_percent, 25);
    assert_eq!(outcome.event.points_deducted, 116_250);
    assert_eq!(outcome.new_balance, 1_000_000 - 116_250);
}

#[tokio::test]
async fn test_empty_report_is_data_integrity_failure() {
    let billing = billing().await;
    let user = funded_user(&billing, 1000).await;

    let report = UsageReport {
        input_units: Some(0),
        output_units: Some(0),
        total_units: Some(0),
        reported_total_cost: Some(Decimal::ZERO),
        ..UsageReport::new("gpt-4")
    };
    let err = billing.process(user, report).await.unwrap_err();

    assert!(matches!(err, BillingError::DataIntegrity(_)));
    assert_eq!(billing.ledger().balance(user).await.unwrap(), 1000);

    let events = events_for(&billing, user).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, BillingStatus::Failed);
    assert_eq!(events[0].points_deducted, 0);
    assert!(events[0].failure_reason.is_some());
}

#[tokio::test]
async fn test_reported_total_converted_at_recorded_rate() {
    let billing = billing().await;
    billing
        .settings()
        .record_exchange_rate(dec!(10000), Some(Utc::now() - Duration::minutes(1)))
        .await
        .unwrap();
    let user = funded_user(&billing, 1000).await;

    let report = UsageReport {
        reported_total_cost: Some(dec!(0.01)),
        ..UsageReport::new("unlisted-model")
    };
    let outcome = billing.process(user, report).await.unwrap();

    assert_eq!(outcome.event.total_cost, dec!(0.012));
    assert_eq!(outcome.event.cost_source, CostSource::ReportedTotal);
    assert_eq!(outcome.event.exchange_rate_snapshot, dec!(10000));
    assert_eq!(outcome.event.points_deducted, 120);
    assert_eq!(outcome.new_balance, 880);
}

#[tokio::test]
async fn test_zero_points_raised_to_minimum() {
    let billing = billing().await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("free-tier", dec!(0), dec!(0)))
        .await
        .unwrap();
    let user = funded_user(&billing, 10).await;

    let outcome = billing
        .process(user, UsageReport::new("free-tier").with_units(10, 10))
        .await
        .unwrap();

    // 0.001 minimum × 1000 points per unit
    assert_eq!(outcome.event.points_deducted, 1);
    assert!(outcome.event.minimum_applied);
    assert_eq!(outcome.new_balance, 9);
}

#[tokio::test]
async fn test_minimum_rounding_to_zero_is_invalid_charge() {
    let mut config = TollgateConfig::default();
    config.billing.minimum_charge_cost = dec!(0.0001);
    let billing = billing_with(config).await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("free-tier", dec!(0), dec!(0)))
        .await
        .unwrap();
    let user = funded_user(&billing, 10).await;

    let err = billing
        .process(user, UsageReport::new("free-tier").with_units(10, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::InvalidCharge(_)));
    assert_eq!(billing.ledger().balance(user).await.unwrap(), 10);
    let events = events_for(&billing, user).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, BillingStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_charges_never_overdraw() {
    let billing = billing().await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("gpt-4", dec!(30), dec!(60)))
        .await
        .unwrap();
    billing.settings().set_margin_percent(25).await.unwrap();
    // Covers one 116250-point charge, not two.
    let user = funded_user(&billing, 150_000).await;

    let report = UsageReport::new("gpt-4").with_units(1500, 800);
    let (first, second) = tokio::join!(
        billing.process(user, report.clone()),
        billing.process(user, report.clone()),
    );

    let results = [first, second];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(BillingError::InsufficientBalance {
                    required: 116_250,
                    available: 33_750,
                    shortfall: 82_500,
                })
            )
        })
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(billing.ledger().balance(user).await.unwrap(), 33_750);

    let events = events_for(&billing, user).await;
    assert_eq!(events.len(), 2);
    let deducted: i64 = events.iter().map(|e| e.points_deducted).sum();
    assert_eq!(deducted, 116_250);
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let billing = billing().await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("claude-3-5-sonnet", dec!(3), dec!(15)))
        .await
        .unwrap();

    for model in ["claude-3-5-sonnet", "claude-3-haiku", "unknown-model"] {
        assert_eq!(
            billing.catalog().resolve_price(model),
            billing.catalog().resolve_price(model)
        );
    }
}

#[tokio::test]
async fn test_operator_price_takes_precedence() {
    let billing = billing().await;
    let user = funded_user(&billing, 1_000_000).await;

    // First sight auto-derives a record from the family default.
    billing
        .process(user, UsageReport::new("gpt-4").with_units(1000, 1000))
        .await
        .unwrap();
    let auto = billing.catalog().resolve_price("gpt-4");
    assert_eq!(
        auto.record().map(|r| r.origin),
        Some(PriceOrigin::AutoDerived)
    );

    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("gpt-4", dec!(1), dec!(2)))
        .await
        .unwrap();
    let ResolvedPrice::Record(record) = billing.catalog().resolve_price("gpt-4") else {
        panic!("Expected catalog record");
    };
    assert!(record.is_operator_set());
    assert_eq!(
        UnitPrices::new(record.input_unit_price, record.output_unit_price),
        UnitPrices::new(dec!(1), dec!(2))
    );
}

#[tokio::test]
async fn test_successful_charge_conserves_points() {
    let billing = billing().await;
    let user = funded_user(&billing, 50_000).await;

    let reports = [
        UsageReport::new("gpt-4o-mini").with_units(12_000, 3_000),
        UsageReport::new("claude-3-opus").with_units(700, 2_100),
        UsageReport::new("gemini-1.5-pro").with_excerpt("a fairly short prompt"),
    ];

    let mut balance = 50_000;
    for report in reports {
        let outcome = billing.process(user, report).await.unwrap();
        let stored = billing
            .ledger()
            .history(&BillingEventFilter::for_user(user))
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.id == outcome.event.id)
            .unwrap();

        assert_eq!(stored.points_deducted, outcome.event.points_deducted);
        assert_eq!(outcome.new_balance, balance - stored.points_deducted);
        balance = outcome.new_balance;
    }
    assert_eq!(billing.ledger().balance(user).await.unwrap(), balance);
}

#[tokio::test]
async fn test_charge_never_below_minimum() {
    let billing = billing().await;
    let user = funded_user(&billing, 1_000_000).await;
    let minimum = billing.billing_config().await.unwrap().limits().minimum_points();

    for units in [0u64, 1, 10, 100, 1_000] {
        let report = UsageReport::new("mistral-small")
            .with_units(units, units)
            .with_excerpt("hello");
        let outcome = billing.process(user, report).await.unwrap();
        assert!(outcome.event.points_deducted >= minimum);
    }
}

#[tokio::test]
async fn test_blank_excerpt_uses_conservative_estimate() {
    let billing = billing().await;
    let user = funded_user(&billing, 1_000_000).await;

    let report = UsageReport::new("llama-3-70b").with_excerpt("   \n\t ");
    let outcome = billing.process(user, report).await.unwrap();

    assert!(outcome.event.units_estimated);
    assert_eq!(outcome.event.input_units, CONSERVATIVE_ESTIMATE.input_units);
    assert_eq!(outcome.event.output_units, CONSERVATIVE_ESTIMATE.output_units);
}

#[tokio::test]
async fn test_failed_charge_publishes_event() {
    let events = Arc::new(EventBus::new());
    let billing =
        BillingService::from_config(create_test_db().await, &TollgateConfig::default(), events.clone())
            .await
            .unwrap();
    let mut rx = events.subscribe();
    let user = Uuid::new_v4();

    let err = billing
        .process(user, UsageReport::new("gpt-4").with_units(1000, 1000))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InsufficientBalance { available: 0, .. }));

    let mut failed = None;
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::ChargeFailed { billing_event_id, .. } = event {
            failed = billing_event_id;
        }
    }
    let event_id = failed.expect("ChargeFailed event");
    let stored = events_for(&billing, user).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, event_id);
}

#[tokio::test]
async fn test_one_sided_reported_cost_is_charged() {
    let billing = billing().await;
    billing
        .catalog()
        .create(CreatePriceRecord::token_metered("text-embedding-3", dec!(0.00002), dec!(0)))
        .await
        .unwrap();
    let user = funded_user(&billing, 100_000).await;

    let with_units = UsageReport {
        reported_input_cost: Some(dec!(5)),
        reported_output_cost: Some(Decimal::ZERO),
        ..UsageReport::new("text-embedding-3").with_units(1000, 0)
    };
    let outcome = billing.process(user, with_units).await.unwrap();
    assert_eq!(outcome.event.cost_source, CostSource::ReportedSplit);
    assert_eq!(outcome.event.total_cost, dec!(6));
    assert_eq!(outcome.event.points_deducted, 6000);
    assert!(!outcome.event.minimum_applied);

    let without_units = UsageReport {
        reported_input_cost: Some(dec!(5)),
        ..UsageReport::new("text-embedding-3")
    };
    let outcome = billing.process(user, without_units).await.unwrap();
    assert_eq!(outcome.event.cost_source, CostSource::ReportedSplit);
    assert_eq!(outcome.event.points_deducted, 6000);
    assert!(!outcome.event.minimum_applied);
    assert_eq!(outcome.new_balance, 100_000 - 12_000);
}
