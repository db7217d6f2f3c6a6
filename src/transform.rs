//! ML dataset construction.
//!
//! Transforms the stored errand and order tables into flat, model-ready
//! tables: currency normalization to USD, weekday/time-slot buckets, per-order
//! errand sequencing, and derived size/flag columns.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::info;

use crate::analyzers::utility::round_to;
use crate::error::{self, AnalysisError};
use crate::store::{self, DATE_FORMAT};
use crate::table::{Table, Value};

/// Currency display name to ISO 4217 code.
const CURRENCIES: &[(&str, &str)] = &[
    ("Euro", "EUR"),
    ("US Dollar", "USD"),
    ("Pound Sterling", "GBP"),
    ("Australian Dollar", "AUD"),
    ("Brazilian Real", "BRL"),
    ("Danish Krone", "DKK"),
    ("Saudi Riyal", "SAR"),
    ("Mexican Peso", "MXN"),
    ("Zloty", "PLN"),
    ("Norwegian Krone", "NOK"),
    ("Canadian Dollar", "CAD"),
    ("United Arab Emirates dirham", "AED"),
    ("Swedish Krona", "SEK"),
    ("Chilean Peso", "CLP"),
    ("Peso Uruguayo", "UYU"),
    ("Nuevo Sol Peru", "PEN"),
    ("South Korean Won", "KRW"),
    ("Malaysian Ringgit", "MYR"),
    ("Argentine Peso", "ARS"),
    ("Thai Baht", "THB"),
    ("Czech Koruna", "CZK"),
    ("Colombian Peso Colombia", "COP"),
    ("Kuwaiti Dinar", "KWD"),
    ("Swiss Franc", "CHF"),
    ("Hryvnia Ukraine", "UAH"),
    ("South African Rand", "ZAR"),
    ("Japanese yen", "JPY"),
    ("Jordanian Dinar", "JOD"),
    ("Bahraini Dinar", "BHD"),
    ("New Zealand Dollar", "NZD"),
    ("Indian Rupee", "INR"),
    ("Egyptian Pound", "EGP"),
    ("Bulgarian Lev", "BGN"),
    ("Rupiah Indonesia", "IDR"),
    ("Turkish Lira", "TRY"),
    ("Qatari Rial", "QAR"),
    ("Singapore Dollar", "SGD"),
    ("Hong Kong Dollar", "HKD"),
    ("Philippine Peso", "PHP"),
    ("New Taiwan Dollar", "TWD"),
    ("Rial Omani Oman", "OMR"),
    ("Forint", "HUF"),
    ("Yuan Renminbi", "CNY"),
    ("Vietnamese dong", "VND"),
    ("Iceland Krona", "ISK"),
    ("Tenge Kazakhstan", "KZT"),
    ("Uzbekistan Som", "UZS"),
];

/// Approximate USD exchange rate per ISO code.
const RATES: &[(&str, f64)] = &[
    ("EUR", 0.95),
    ("AUD", 1.45),
    ("BRL", 5.10),
    ("USD", 1.00),
    ("DKK", 6.95),
    ("SAR", 3.75),
    ("MXN", 16.80),
    ("GBP", 0.82),
    ("PLN", 4.20),
    ("NOK", 10.60),
    ("CAD", 1.30),
    ("AED", 3.67),
    ("SEK", 10.50),
    ("CLP", 930.00),
    ("UYU", 40.50),
    ("PEN", 3.80),
    ("KRW", 1315.00),
    ("MYR", 4.75),
    ("ARS", 950.00),
    ("THB", 36.00),
    ("CZK", 23.10),
    ("COP", 4000.00),
    ("KWD", 0.31),
    ("CHF", 0.87),
    ("UAH", 39.00),
    ("ZAR", 19.20),
    ("JPY", 145.00),
    ("JOD", 0.71),
    ("BHD", 0.38),
    ("NZD", 1.55),
    ("INR", 84.00),
    ("EGP", 31.50),
    ("BGN", 1.80),
    ("IDR", 15600.0),
    ("TRY", 33.00),
    ("QAR", 3.64),
    ("SGD", 1.34),
    ("HKD", 7.82),
    ("PHP", 57.00),
    ("TWD", 31.20),
    ("OMR", 0.385),
    ("HUF", 355.00),
    ("CNY", 7.20),
    ("VND", 24500.0),
    ("ISK", 137.00),
    ("KZT", 450.00),
    ("UZS", 12400.0),
];

/// Immutable currency lookup configuration injected into the transformer.
pub struct CurrencyConfig {
    currencies: HashMap<&'static str, &'static str>,
    rates: HashMap<&'static str, f64>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        CurrencyConfig {
            currencies: CURRENCIES.iter().copied().collect(),
            rates: RATES.iter().copied().collect(),
        }
    }
}

impl CurrencyConfig {
    /// ISO code for a currency display name.
    pub fn iso_code(&self, name: &str) -> error::Result<&'static str> {
        self.currencies
            .get(name)
            .copied()
            .ok_or_else(|| AnalysisError::UnmappedCurrency(name.to_string()))
    }

    /// USD exchange rate for an ISO code.
    pub fn usd_rate(&self, iso: &str) -> error::Result<f64> {
        self.rates
            .get(iso)
            .copied()
            .ok_or_else(|| AnalysisError::MissingRate(iso.to_string()))
    }

    /// Checks that every non-null value of a currency column maps to an ISO
    /// code with a known rate. Evaluated eagerly before any transformation.
    pub fn validate_column(&self, values: &[Value]) -> error::Result<()> {
        for value in values {
            if value.is_null() {
                continue;
            }
            let iso = self.iso_code(&value.to_string())?;
            self.usd_rate(iso)?;
        }
        Ok(())
    }
}

/// Day-of-week name for a `%Y-%m-%d %H:%M:%S` timestamp string.
pub fn weekday(datetime_str: &str) -> Result<String> {
    let dt = NaiveDateTime::parse_from_str(datetime_str, DATE_FORMAT)
        .with_context(|| format!("parsing timestamp '{}'", datetime_str))?;
    Ok(dt.format("%A").to_string())
}

/// Time-slot bucket for a timestamp: "A" for hours 0-6, "B" for 7-12,
/// "C" for 13-18, "D" otherwise.
pub fn time_slot(datetime_str: &str) -> Result<&'static str> {
    let dt = NaiveDateTime::parse_from_str(datetime_str, DATE_FORMAT)
        .with_context(|| format!("parsing timestamp '{}'", datetime_str))?;
    Ok(match chrono::Timelike::hour(&dt) {
        0..=6 => "A",
        7..=12 => "B",
        13..=18 => "C",
        _ => "D",
    })
}

/// Hours elapsed from `start` to `end`.
fn hours_between(start: &str, end: &str) -> Result<f64> {
    let start = NaiveDateTime::parse_from_str(start, DATE_FORMAT)
        .with_context(|| format!("parsing timestamp '{}'", start))?;
    let end = NaiveDateTime::parse_from_str(end, DATE_FORMAT)
        .with_context(|| format!("parsing timestamp '{}'", end))?;
    Ok((end - start).num_seconds() as f64 / 3600.0)
}

fn strip_prefix_value(value: &Value, prefix: &str) -> Value {
    match value {
        Value::Str(s) => Value::Str(s.replace(prefix, "").trim().to_string()),
        other => other.clone(),
    }
}

/// Order columns copied through unchanged.
const ORDER_PASSTHROUGH: &[&str] = &[
    "customer_group_type",
    "device",
    "client_entry_type",
    "booking_system_source_type",
    "origin_country",
    "journey_type_id",
    "is_changed",
    "is_canceled",
    "cancel_reason",
    "change_reason",
    "count_errands",
    "order_created_at",
];

/// Transforms the orders table into its ML-ready shape.
pub fn transform_orders(orders: &Table, config: &CurrencyConfig) -> Result<Table> {
    info!(rows = orders.len(), "Transforming orders");

    // Validate the whole currency column before transforming anything
    let currency_column = orders.column("currency")?;
    config.validate_column(currency_column)?;
    store::validate_datetime_column(orders, "order_created_at")?;

    let mut out = Table::new();
    out.add_column("order_id", orders.column("order_id")?.to_vec())?;

    let pnr_size: Vec<Value> = orders
        .column("pnr")?
        .iter()
        .map(|v| match v {
            Value::Str(s) => Value::Int(s.split(',').count() as i64),
            _ => Value::Null,
        })
        .collect();
    out.add_column("pnr_size", pnr_size)?;

    for (column, prefix) in [
        ("booking_system", "System "),
        ("brand", "Brand "),
        ("partner", "Partner "),
    ] {
        let stripped: Vec<Value> = orders
            .column(column)?
            .iter()
            .map(|v| strip_prefix_value(v, prefix))
            .collect();
        out.add_column(column, stripped)?;
    }

    let iso_codes: Vec<Value> = currency_column
        .iter()
        .map(|v| {
            if v.is_null() {
                Ok(Value::Null)
            } else {
                Ok(Value::Str(config.iso_code(&v.to_string())?.to_string()))
            }
        })
        .collect::<error::Result<_>>()?;
    out.add_column("currency", iso_codes)?;

    let amounts: Vec<Value> = orders
        .column("order_amount")?
        .iter()
        .zip(currency_column)
        .map(|(amount, currency)| match (amount.as_f64(), currency) {
            (Some(a), c) if !c.is_null() => {
                let rate = config.usd_rate(config.iso_code(&c.to_string())?)?;
                Ok(Value::Float(round_to(a * rate, 2)))
            }
            _ => Ok(Value::Null),
        })
        .collect::<error::Result<_>>()?;
    out.add_column("order_amount", amounts)?;

    for column in ORDER_PASSTHROUGH {
        out.add_column(column, orders.column(column)?.to_vec())?;
    }

    let mut weekdays = Vec::with_capacity(orders.len());
    let mut slots = Vec::with_capacity(orders.len());
    for created in orders.column("order_created_at")? {
        if created.is_null() {
            weekdays.push(Value::Null);
            slots.push(Value::Null);
        } else {
            let raw = created.to_string();
            weekdays.push(Value::Str(weekday(&raw)?));
            slots.push(Value::Str(time_slot(&raw)?.to_string()));
        }
    }
    out.add_column("weekday", weekdays)?;
    out.add_column("time_slot", slots)?;

    let zero_errands: Vec<Value> = orders
        .column("count_errands")?
        .iter()
        .map(|v| match v.as_f64() {
            Some(c) => Value::Bool(c == 0.0),
            None => Value::Null,
        })
        .collect();
    out.add_column("zero_errands", zero_errands)?;

    Ok(out)
}

/// Order columns joined into each errand row.
const JOINED_ORDER_COLUMNS: &[&str] = &[
    "pnr_size",
    "booking_system",
    "brand",
    "partner",
    "order_amount",
    "customer_group_type",
    "device",
    "client_entry_type",
    "origin_country",
    "journey_type_id",
];

fn is_truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true) | Value::Int(1))
}

/// Transforms the errands table: drops test errands, joins order attributes,
/// derives time features and the order-relative contact sequence.
pub fn transform_errands(errands: &Table, orders_ml: &Table) -> Result<Table> {
    info!(rows = errands.len(), "Transforming errands");

    // Remove test errands before anything else
    let flags = errands.column("is_test_errand")?;
    let keep: Vec<usize> = (0..errands.len())
        .filter(|&i| !is_truthy(&flags[i]))
        .collect();

    // Index orders by order_id for the left join
    let mut order_index: HashMap<String, usize> = HashMap::new();
    for (i, id) in orders_ml.column("order_id")?.iter().enumerate() {
        order_index.entry(id.to_string()).or_insert(i);
    }

    struct JoinedRow {
        order_id: String,
        order_diff: Option<f64>,
        values: Vec<Value>,
    }

    let errand_ids = errands.column("errand_id")?;
    let created_column = errands.column("created")?;
    let category = errands.column("errand_category")?;
    let errand_type = errands.column("errand_type")?;
    let action = errands.column("errand_action")?;
    let channel = errands.column("errand_channel")?;
    let order_ids = errands.column("order_id")?;

    let order_created = orders_ml.column("order_created_at")?;

    let mut joined = Vec::with_capacity(keep.len());
    for &i in &keep {
        let order_id = order_ids[i].to_string();
        let order_row = order_index.get(&order_id).copied();

        let created = created_column[i].to_string();
        let (weekday_value, slot_value) = if created_column[i].is_null() {
            (Value::Null, Value::Null)
        } else {
            (
                Value::Str(weekday(&created)?),
                Value::Str(time_slot(&created)?.to_string()),
            )
        };

        let order_diff = match order_row {
            Some(row) if !created_column[i].is_null() && !order_created[row].is_null() => {
                Some(hours_between(&order_created[row].to_string(), &created)?)
            }
            _ => None,
        };

        let mut values = vec![
            errand_ids[i].clone(),
            order_ids[i].clone(),
            created_column[i].clone(),
            weekday_value,
            slot_value,
            order_diff.map(Value::Float).unwrap_or(Value::Null),
            category[i].clone(),
            errand_type[i].clone(),
            action[i].clone(),
            channel[i].clone(),
        ];
        for column in JOINED_ORDER_COLUMNS {
            let value = match order_row {
                Some(row) => orders_ml.column(column)?[row].clone(),
                None => Value::Null,
            };
            values.push(value);
        }

        joined.push(JoinedRow {
            order_id,
            order_diff,
            values,
        });
    }

    // Sort by order then contact time, nulls last within an order
    joined.sort_by(|a, b| {
        a.order_id.cmp(&b.order_id).then(
            a.order_diff
                .unwrap_or(f64::INFINITY)
                .partial_cmp(&b.order_diff.unwrap_or(f64::INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    let mut out = Table::with_columns(&[
        "errand_id",
        "order_id",
        "created",
        "weekday",
        "time_slot",
        "order_diff",
        "errand_category",
        "errand_type",
        "errand_action",
        "errand_channel",
        "pnr_size",
        "booking_system",
        "brand",
        "partner",
        "order_amount",
        "customer_group_type",
        "device",
        "client_entry_type",
        "origin_country",
        "journey_type_id",
        "errand_order",
    ]);

    let mut sequence: HashMap<String, i64> = HashMap::new();
    for row in joined {
        let rank = sequence.entry(row.order_id.clone()).or_insert(0);
        *rank += 1;
        let mut values = row.values;
        values.push(Value::Int(*rank));
        out.push_row(values)?;
    }

    Ok(out)
}

/// Writes a table as CSV. Nulls become empty cells.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    writer.write_record(table.column_names())?;
    for i in 0..table.len() {
        let row: Vec<String> = table.row(i).iter().map(|v| v.to_string()).collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = table.len(), "CSV written");
    Ok(())
}

/// Builds both ML-ready tables from the database and writes them as CSV.
pub fn build_ml_dataset(
    database: &Path,
    out_dir: &Path,
    limits: Option<(usize, usize)>,
) -> Result<(Table, Table)> {
    let (errands, orders) = store::load_tables(database, limits)?;

    let config = CurrencyConfig::default();
    let orders_ml = transform_orders(&orders, &config)?;
    let errands_ml = transform_errands(&errands, &orders_ml)?;

    write_csv(&orders_ml, &out_dir.join("orders_ml.csv"))?;
    write_csv(&errands_ml, &out_dir.join("errands_ml.csv"))?;

    Ok((orders_ml, errands_ml))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday() {
        // 2024-03-01 was a Friday
        assert_eq!(weekday("2024-03-01 10:00:00").unwrap(), "Friday");
    }

    #[test]
    fn test_time_slot_boundaries() {
        assert_eq!(time_slot("2024-03-01 00:00:00").unwrap(), "A");
        assert_eq!(time_slot("2024-03-01 06:59:00").unwrap(), "A");
        assert_eq!(time_slot("2024-03-01 07:00:00").unwrap(), "B");
        assert_eq!(time_slot("2024-03-01 12:30:00").unwrap(), "B");
        assert_eq!(time_slot("2024-03-01 13:00:00").unwrap(), "C");
        assert_eq!(time_slot("2024-03-01 18:59:00").unwrap(), "C");
        assert_eq!(time_slot("2024-03-01 19:00:00").unwrap(), "D");
        assert_eq!(time_slot("2024-03-01 23:59:59").unwrap(), "D");
    }

    #[test]
    fn test_hours_between() {
        let h = hours_between("2024-03-01 10:00:00", "2024-03-01 13:30:00").unwrap();
        assert_eq!(h, 3.5);
    }

    #[test]
    fn test_currency_config_lookup() {
        let config = CurrencyConfig::default();
        assert_eq!(config.iso_code("Euro").unwrap(), "EUR");
        assert_eq!(config.usd_rate("EUR").unwrap(), 0.95);
    }

    #[test]
    fn test_currency_config_unmapped_currency() {
        let config = CurrencyConfig::default();
        let err = config.iso_code("Doubloon").unwrap_err();
        assert!(matches!(err, AnalysisError::UnmappedCurrency(name) if name == "Doubloon"));
    }

    #[test]
    fn test_currency_validate_column_is_eager() {
        let config = CurrencyConfig::default();
        let values = vec![
            Value::Str("Euro".into()),
            Value::Str("Doubloon".into()),
            Value::Str("US Dollar".into()),
        ];
        assert!(config.validate_column(&values).is_err());
    }

    fn orders_fixture() -> Table {
        let mut t = Table::with_columns(&[
            "order_id",
            "pnr",
            "booking_system",
            "brand",
            "partner",
            "currency",
            "order_amount",
            "customer_group_type",
            "device",
            "client_entry_type",
            "booking_system_source_type",
            "origin_country",
            "journey_type_id",
            "is_changed",
            "is_canceled",
            "cancel_reason",
            "change_reason",
            "count_errands",
            "order_created_at",
        ]);
        t.push_row(vec![
            Value::Int(1295),
            Value::Str("AAA,BBB".into()),
            Value::Str("System Alpha".into()),
            Value::Str("Brand One".into()),
            Value::Str("Partner X".into()),
            Value::Str("Euro".into()),
            Value::Float(100.0),
            Value::Str("B2C".into()),
            Value::Str("mobile".into()),
            Value::Str("app".into()),
            Value::Str("direct".into()),
            Value::Str("SE".into()),
            Value::Int(1),
            Value::Bool(false),
            Value::Bool(false),
            Value::Null,
            Value::Null,
            Value::Int(2),
            Value::Str("2024-03-01 08:00:00".into()),
        ])
        .unwrap();
        t.push_row(vec![
            Value::Int(36),
            Value::Str("CCC".into()),
            Value::Str("System Beta".into()),
            Value::Str("Brand Two".into()),
            Value::Str("Partner Y".into()),
            Value::Str("US Dollar".into()),
            Value::Float(50.0),
            Value::Str("B2B".into()),
            Value::Str("desktop".into()),
            Value::Str("web".into()),
            Value::Str("meta".into()),
            Value::Str("NO".into()),
            Value::Int(2),
            Value::Bool(true),
            Value::Bool(false),
            Value::Null,
            Value::Null,
            Value::Int(0),
            Value::Str("2024-03-02 20:00:00".into()),
        ])
        .unwrap();
        t
    }

    #[test]
    fn test_transform_orders_derived_columns() {
        let orders = transform_orders(&orders_fixture(), &CurrencyConfig::default()).unwrap();

        assert_eq!(orders.column("pnr_size").unwrap()[0], Value::Int(2));
        assert_eq!(
            orders.column("booking_system").unwrap()[0],
            Value::Str("Alpha".into())
        );
        assert_eq!(orders.column("currency").unwrap()[0], Value::Str("EUR".into()));
        assert_eq!(orders.column("order_amount").unwrap()[0], Value::Float(95.0));
        assert_eq!(orders.column("weekday").unwrap()[0], Value::Str("Friday".into()));
        assert_eq!(orders.column("time_slot").unwrap()[0], Value::Str("B".into()));
        assert_eq!(orders.column("time_slot").unwrap()[1], Value::Str("D".into()));
        assert_eq!(orders.column("zero_errands").unwrap()[0], Value::Bool(false));
        assert_eq!(orders.column("zero_errands").unwrap()[1], Value::Bool(true));
    }

    fn errands_fixture() -> Table {
        let mut t = Table::with_columns(&[
            "errand_id",
            "is_test_errand",
            "created",
            "order_id",
            "errand_category",
            "errand_type",
            "errand_action",
            "errand_channel",
        ]);
        let rows = [
            (1, false, "2024-03-01 12:00:00", 1295, "change", "date", "call", "phone"),
            (2, false, "2024-03-01 09:00:00", 1295, "cancel", "full", "chat", "web"),
            (3, true, "2024-03-01 10:00:00", 1295, "test", "test", "test", "test"),
            (4, false, "2024-03-03 10:00:00", 36, "refund", "partial", "mail", "email"),
        ];
        for (id, test, created, order, cat, typ, action, channel) in rows {
            t.push_row(vec![
                Value::Int(id),
                Value::Bool(test),
                Value::Str(created.into()),
                Value::Int(order),
                Value::Str(cat.into()),
                Value::Str(typ.into()),
                Value::Str(action.into()),
                Value::Str(channel.into()),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_transform_errands_drops_test_rows_and_sequences() {
        let orders_ml = transform_orders(&orders_fixture(), &CurrencyConfig::default()).unwrap();
        let errands_ml = transform_errands(&errands_fixture(), &orders_ml).unwrap();

        assert_eq!(errands_ml.len(), 3);

        // Sorted by order_id then order_diff: order "1295" first, its earlier
        // errand (id 2) before the later one (id 1)
        let ids = errands_ml.column("errand_id").unwrap();
        assert_eq!(ids[0], Value::Int(2));
        assert_eq!(ids[1], Value::Int(1));
        assert_eq!(ids[2], Value::Int(4));

        let sequence = errands_ml.column("errand_order").unwrap();
        assert_eq!(sequence[0], Value::Int(1));
        assert_eq!(sequence[1], Value::Int(2));
        assert_eq!(sequence[2], Value::Int(1));

        // order_diff in hours from order creation to contact
        assert_eq!(errands_ml.column("order_diff").unwrap()[0], Value::Float(1.0));
        assert_eq!(errands_ml.column("order_diff").unwrap()[1], Value::Float(4.0));

        // joined order attribute
        assert_eq!(
            errands_ml.column("booking_system").unwrap()[0],
            Value::Str("Alpha".into())
        );
    }

    #[test]
    fn test_transform_orders_missing_column_fails() {
        let t = Table::with_columns(&["order_id"]);
        let err = transform_orders(&t, &CurrencyConfig::default()).unwrap_err();
        assert!(err.to_string().contains("currency"));
    }
}
