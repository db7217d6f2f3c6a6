use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use errand_insights::analyzers::{analyze_table, categorical, contacts};
use errand_insights::report::RecordingSink;
use errand_insights::store;
use errand_insights::transform;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("errand_insights_{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

const ERRANDS_CSV: &str = "\
Errand Id,Is Test Errand,Created,Order Number,Errand Category,Errand Type,Errand Action,Errand Channel
1,false,2024-03-01 09:00:00,zz,change,date,call,phone
2,false,2024-03-01 12:00:00,zz,cancel,full,chat,web
3,true,2024-03-01 13:00:00,zz,test,test,test,test
4,false,2024-03-03 10:30:00,10,refund,partial,mail,email
5,false,2024-03-03 11:00:00,10,change,date,call,phone
";

const ORDERS_CSV: &str = "\
Order Id,Pnr,Booking System,Brand,Partner,Currency,Order Amount,Customer Group Type,Device,Client Entry Type,Booking System Source Type,Origin Country,Journey Type Id,Is Changed,Is Canceled,Cancel Reason,Change Reason,Order Created At
1295,AAA,System Alpha,Brand One,Partner X,Euro,100.0,B2C,mobile,app,direct,SE,1,true,false,,,2024-03-01 08:00:00
36,BBB,System Beta,Brand Two,Partner Y,US Dollar,50.0,B2B,desktop,web,meta,NO,2,false,false,,,2024-03-03 07:15:00
77,CCC,System Alpha,Brand One,Partner X,Euro,80.0,B2C,mobile,app,direct,DK,1,false,true,,,2024-03-04 22:00:00
";

#[test]
fn test_full_pipeline() {
    let dir = temp_dir("pipeline");
    let errands_csv = dir.join("errands.csv");
    let orders_csv = dir.join("orders.csv");
    fs::write(&errands_csv, ERRANDS_CSV).unwrap();
    fs::write(&orders_csv, ORDERS_CSV).unwrap();

    let database = dir.join("errands.db");
    store::build_database(&errands_csv, &orders_csv, &database, false).unwrap();

    let (errands, orders) = store::load_tables(&database, None).unwrap();
    assert_eq!(errands.len(), 5);
    assert_eq!(orders.len(), 3);

    // derived errand counts: order zz (1295) has 3 errand rows, 10 (36) has
    // 2, and 77 has none
    let counts = orders.numeric_column("count_errands").unwrap();
    assert_eq!(counts, vec![3.0, 2.0, 0.0]);

    let (orders_ml, errands_ml) = transform::build_ml_dataset(&database, &dir, None).unwrap();
    assert!(dir.join("orders_ml.csv").exists());
    assert!(dir.join("errands_ml.csv").exists());

    // test errand dropped, ranks assigned per order
    assert_eq!(errands_ml.len(), 4);
    assert_eq!(
        errands_ml.numeric_column("errand_order").unwrap(),
        vec![1.0, 2.0, 1.0, 2.0]
    );

    assert_eq!(orders_ml.len(), 3);
    let slots: Vec<String> = orders_ml
        .column("time_slot")
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(slots, vec!["B", "B", "D"]);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_load_tables_with_limits() {
    let dir = temp_dir("limits");
    let errands_csv = dir.join("errands.csv");
    let orders_csv = dir.join("orders.csv");
    fs::write(&errands_csv, ERRANDS_CSV).unwrap();
    fs::write(&orders_csv, ORDERS_CSV).unwrap();

    let database = dir.join("errands.db");
    store::build_database(&errands_csv, &orders_csv, &database, false).unwrap();

    let (errands, orders) = store::load_tables(&database, Some((2, 1))).unwrap();
    assert_eq!(errands.len(), 2);
    assert_eq!(orders.len(), 1);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_report_over_built_tables() {
    let dir = temp_dir("report");
    let errands_csv = dir.join("errands.csv");
    let orders_csv = dir.join("orders.csv");
    fs::write(&errands_csv, ERRANDS_CSV).unwrap();
    fs::write(&orders_csv, ORDERS_CSV).unwrap();

    let database = dir.join("errands.db");
    store::build_database(&errands_csv, &orders_csv, &database, false).unwrap();
    let (errands, orders) = store::load_tables(&database, None).unwrap();

    let mut sink = RecordingSink::default();
    analyze_table(
        &errands,
        &["errand_id", "order_id", "created", "is_test_errand"],
        &[("errand_category", "errand_type")],
        &mut sink,
    )
    .unwrap();

    // summary header + numerical summary + per-column and dependency tables
    assert!(sink.markdown.iter().any(|m| m.contains("Dataset Summary")));
    assert!(
        sink.tables
            .iter()
            .any(|(title, _, _)| title == "Combined Analysis: (errand_category, errand_type)")
    );

    let mut stats_sink = RecordingSink::default();
    contacts::analyze_contacts(&orders, "is_changed", &mut stats_sink).unwrap();
    assert!(
        stats_sink
            .markdown
            .iter()
            .any(|m| m.contains("Stratified Statistics"))
    );

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_contact_stats_with_filter() {
    let dir = temp_dir("filter");
    let errands_csv = dir.join("errands.csv");
    let orders_csv = dir.join("orders.csv");
    fs::write(&errands_csv, ERRANDS_CSV).unwrap();
    fs::write(&orders_csv, ORDERS_CSV).unwrap();

    let database = dir.join("errands.db");
    store::build_database(&errands_csv, &orders_csv, &database, false).unwrap();
    let (_, orders) = store::load_tables(&database, None).unwrap();

    let wanted: HashSet<String> = ["1".to_string()].into_iter().collect();
    let filtered = contacts::filter_rows(&orders, Some("is_changed"), Some(&wanted)).unwrap();
    assert_eq!(filtered.len(), 1);

    let stats = contacts::compute_stats(&filtered, None).unwrap();
    assert_eq!(stats[0].1.count, 1);
    assert_eq!(stats[0].1.mean, 3.0);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_categorical_analysis_of_raw_errands() {
    let dir = temp_dir("categorical");
    let errands_csv = dir.join("errands.csv");
    let orders_csv = dir.join("orders.csv");
    fs::write(&errands_csv, ERRANDS_CSV).unwrap();
    fs::write(&orders_csv, ORDERS_CSV).unwrap();

    let database = dir.join("errands.db");
    store::build_database(&errands_csv, &orders_csv, &database, false).unwrap();
    let (errands, _) = store::load_tables(&database, None).unwrap();

    let counts = errands.value_counts("errand_category").unwrap();
    assert_eq!(counts[0], ("change".to_string(), 2));

    let metrics = categorical::concentration_metrics(&counts);
    assert_eq!(metrics.unique, 4);
    assert!(metrics.gini_coef > 0.0 && metrics.gini_coef < 1.0);

    fs::remove_dir_all(&dir).unwrap();
}
