use proptest::prelude::*;
use unirecon_core::{Row, Value};
use unirecon_recon::stage::stage_source;
use unirecon_recon::{
    reconcile, summarize, BreakType, DefinitionConfig, MatchingResult, MemoryRecordStore, RecordStore, ReconError,
};
use unirecon_transform::Evaluators;

const FX_TRADES: &str = r#"
code = "FX-TRADES"
name = "FX trades: booking vs confirmation"

[[fields]]
name = "tradeId"
role = "key"
display_order = 1

[[fields]]
name = "amount"
role = "compare"
data_type = "decimal"
comparison = "numeric_threshold"
threshold_percentage = "2"

[[fields]]
name = "ccy"
role = "compare"
comparison = "case_insensitive"

[[fields]]
name = "desk"
role = "product"

[[fields]]
name = "entity"
role = "entity"

[[sources]]
code = "BOOK"
anchor = true
file = "book.csv"

[[sources.plan.column_operations]]
type = "round"
source_column = "amt"
target_column = "amt"
scale = 2

[[sources.mappings]]
field = "tradeId"
column = "trade_id"

[[sources.mappings]]
field = "amount"
column = "amt"

[[sources.mappings]]
field = "ccy"

[[sources.mappings]]
field = "desk"

[[sources.mappings]]
field = "entity"
column = "le"
default_value = "LDN"

[[sources]]
code = "CPTY"
file = "cpty.csv"
"#;

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs.iter().copied().collect()
}

fn book(id: &str, amount: &str) -> Row {
    row(&[("trade_id", id), ("amt", amount), ("ccy", "USD"), ("desk", "FX")])
}

fn cpty(id: &str, amount: &str) -> Row {
    row(&[("tradeId", id), ("amount", amount), ("ccy", "usd"), ("entity", "NY")])
}

/// Stage both feeds into a fresh store, then reconcile.
fn load_and_run(config_toml: &str, book_rows: Vec<Row>, cpty_rows: Vec<Row>) -> Result<MatchingResult, ReconError> {
    let config = DefinitionConfig::from_toml(config_toml)?;
    let evaluators = Evaluators::new();
    let store = MemoryRecordStore::new();
    for (code, rows) in [("BOOK", book_rows), ("CPTY", cpty_rows)] {
        let source = config.source(code).ok_or_else(|| ReconError::ConfigValidation(code.into()))?;
        let records = stage_source(&config.fields, source, rows, &evaluators)?;
        store.ingest(&config.code, code, "test", records)?;
    }
    reconcile(&config.definition(), &store)
}

fn keys(result: &MatchingResult, break_type: BreakType) -> Vec<String> {
    result.breaks_of(break_type).map(|b| b.canonical_key.clone()).collect()
}

// -------------------------------------------------------------------------
// End to end
// -------------------------------------------------------------------------

#[test]
fn anchor_abc_against_bcd() {
    let result = load_and_run(
        FX_TRADES,
        vec![book("A", "100"), book("B", "100"), book("C", "100")],
        vec![cpty("B", "150"), cpty("C", "100.00"), cpty("D", "5")],
    )
    .unwrap();

    assert_eq!(result.matched_count, 1);
    assert_eq!(result.mismatched_count, 1);
    assert_eq!(result.missing_count, 2);
    assert_eq!(keys(&result, BreakType::Mismatch), ["B"]);
    assert_eq!(keys(&result, BreakType::SourceMissing), ["A"]);
    assert_eq!(keys(&result, BreakType::AnchorMissing), ["D"]);

    let b = result.breaks_of(BreakType::Mismatch).next().unwrap();
    assert_eq!(b.mismatched_fields, ["amount"]);
    assert_eq!(b.snapshot("BOOK").unwrap().value("amount"), &Value::Decimal(100.into()));
    assert_eq!(b.classification("product"), Some("FX"));
    // BOOK defaults entity to LDN and comes first
    assert_eq!(b.classification("entity"), Some("LDN"));

    let d = result.breaks_of(BreakType::AnchorMissing).next().unwrap();
    assert_eq!(d.missing_sources, ["BOOK"]);
    assert_eq!(d.classification("entity"), Some("NY"));
    assert_eq!(d.classification("product"), None);

    let summary = summarize(&result);
    assert_eq!(summary.total_breaks, 3);
    assert_eq!(summary.by_product[0].label, "FX");
    assert_eq!(summary.by_product[0].count, 2);
}

#[test]
fn threshold_asymmetry_is_pinned() {
    // anchor 100 vs 103 at 2%: tolerance 2.00, difference 3
    let result = load_and_run(FX_TRADES, vec![book("T", "100")], vec![cpty("T", "103")]).unwrap();
    assert_eq!(result.mismatched_count, 1);

    // anchor 103 vs 100 at 2%: tolerance 2.06, difference 3
    let result = load_and_run(FX_TRADES, vec![book("T", "103")], vec![cpty("T", "100")]).unwrap();
    assert_eq!(result.matched_count, 1);
    assert!(!result.has_breaks());
}

#[test]
fn threshold_uses_rounded_anchor_value() {
    // BOOK rounds 100.004 to 100.00 before projection
    let result = load_and_run(FX_TRADES, vec![book("T", "100.004")], vec![cpty("T", "102")]).unwrap();
    assert_eq!(result.matched_count, 1);
}

#[test]
fn empty_comparison_feed_makes_everything_source_missing() {
    let result = load_and_run(FX_TRADES, vec![book("A", "1"), book("B", "2")], vec![]).unwrap();
    assert_eq!(result.missing_count, 2);
    assert!(result.breaks.iter().all(|b| b.missing_sources == ["CPTY"]));
    assert!(result.breaks.iter().all(|b| b.snapshot("CPTY") == Some(&Row::new())));
}

#[test]
fn unparseable_amount_aborts_run() {
    let config = FX_TRADES.replace("data_type = \"decimal\"\n", "");
    let err = load_and_run(&config, vec![book("A", "1")], vec![cpty("A", "one")]).unwrap_err();
    assert!(matches!(err, ReconError::DataQuality(_)), "{err}");
}

#[test]
fn never_ingested_source_is_not_fatal() {
    let config = DefinitionConfig::from_toml(FX_TRADES).unwrap();
    let store = MemoryRecordStore::new();
    let records = stage_source(&config.fields, &config.sources[0], vec![book("A", "1")], &Evaluators::new()).unwrap();
    store.ingest(&config.code, "BOOK", "only", records).unwrap();

    let result = reconcile(&config.definition(), &store).unwrap();
    assert_eq!(result.missing_count, 1);
    assert_eq!(result.breaks[0].break_type, BreakType::SourceMissing);
}

#[test]
fn reingesting_replaces_the_latest_batch() {
    let config = DefinitionConfig::from_toml(FX_TRADES).unwrap();
    let evaluators = Evaluators::new();
    let store = MemoryRecordStore::new();
    let stage = |code: &str, rows: Vec<Row>| {
        let source = config.source(code).unwrap();
        stage_source(&config.fields, source, rows, &evaluators).unwrap()
    };

    store.ingest(&config.code, "BOOK", "v1", stage("BOOK", vec![book("A", "1")])).unwrap();
    store.ingest(&config.code, "CPTY", "v1", stage("CPTY", vec![cpty("A", "9")])).unwrap();
    assert_eq!(reconcile(&config.definition(), &store).unwrap().mismatched_count, 1);

    store.ingest(&config.code, "CPTY", "v2", stage("CPTY", vec![cpty("A", "1")])).unwrap();
    assert_eq!(reconcile(&config.definition(), &store).unwrap().matched_count, 1);
}

// -------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------

fn config_128() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(128),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn arb_trades() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map(r"T[0-9]{1,4}", r"-?[0-9]{1,6}(\.[0-9]{1,2})?", 0..30)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(config_128())]

    #[test]
    fn identical_feeds_have_no_breaks(trades in arb_trades()) {
        let book_rows = trades.iter().map(|(id, amt)| book(id, amt)).collect();
        let cpty_rows = trades.iter().map(|(id, amt)| cpty(id, amt)).collect();
        let result = load_and_run(FX_TRADES, book_rows, cpty_rows).unwrap();
        prop_assert_eq!(result.matched_count, trades.len());
        prop_assert!(!result.has_breaks());
    }

    #[test]
    fn dropping_one_key_yields_one_source_missing(trades in arb_trades(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!trades.is_empty());
        let dropped = pick.index(trades.len());
        let book_rows = trades.iter().map(|(id, amt)| book(id, amt)).collect();
        let cpty_rows = trades
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != dropped)
            .map(|(_, (id, amt))| cpty(id, amt))
            .collect();
        let result = load_and_run(FX_TRADES, book_rows, cpty_rows).unwrap();
        prop_assert_eq!(result.missing_count, 1);
        prop_assert_eq!(result.breaks.len(), 1);
        prop_assert_eq!(result.breaks[0].break_type, BreakType::SourceMissing);
        prop_assert_eq!(&result.breaks[0].canonical_key, &trades[dropped].0);
    }

    #[test]
    fn anchor_absent_keys_merge_into_one_break(trades in arb_trades()) {
        let cpty_rows = trades.iter().map(|(id, amt)| cpty(id, amt)).collect();
        let result = load_and_run(FX_TRADES, vec![], cpty_rows).unwrap();
        prop_assert_eq!(result.missing_count, trades.len());
        prop_assert!(result.breaks.iter().all(|b| b.break_type == BreakType::AnchorMissing));
    }
}
