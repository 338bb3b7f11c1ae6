use super::ui;
use crate::core::market::{InstrumentKind, InstrumentStore, PRICE_DATE_TAG};
use crate::store::MemoryInstrumentStore;
use chrono::{DateTime, FixedOffset};
use comfy_table::{Cell, CellAlignment, Table};

pub fn run(store: &MemoryInstrumentStore, local_offset: FixedOffset) {
    let base = store.base_currency();
    println!(
        "\nPrices in {}",
        ui::style_text(&format!("{} ({})", base.name, base.code), ui::StyleType::Title)
    );
    println!("{}", build_table(store, local_offset));
}

/// Lists every instrument with its stored rate and, for securities, the
/// share price in the currency it is quoted relative to.
pub fn build_table(store: &MemoryInstrumentStore, local_offset: FixedOffset) -> Table {
    let base = store.base_currency();
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Name"),
        ui::header_cell("Kind"),
        ui::header_cell("Ticker"),
        ui::header_cell("Rate"),
        ui::header_cell("Price"),
        ui::header_cell("Updated"),
    ]);

    for instrument in store.instruments() {
        let rate = store.rate(&instrument.id).filter(|r| *r > 0.0);
        let (kind, price) = match instrument.kind {
            InstrumentKind::Currency => ("Currency", None),
            InstrumentKind::Security => {
                let currency = store
                    .relative_currency(&instrument.id)
                    .and_then(|id| store.currency_by_id(&id))
                    .unwrap_or_else(|| base.clone());
                ("Security", rate.map(|r| currency.format_amount(currency.rate / r)))
            }
        };
        let updated = store
            .tag(&instrument.id, PRICE_DATE_TAG)
            .and_then(|millis| millis.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .map(|at| at.with_timezone(&local_offset).format("%Y-%m-%d %H:%M").to_string());

        table.add_row(vec![
            Cell::new(&instrument.name),
            Cell::new(kind),
            Cell::new(instrument.ticker.as_deref().unwrap_or("")),
            ui::format_optional_cell(rate, |r| format!("{r:.6}")),
            ui::format_optional_cell(price, |p| p),
            Cell::new(updated.unwrap_or_default()).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shows_prices_in_quote_currency() {
        let store = MemoryInstrumentStore::new("EUR");
        store.insert_currency("EUR", "EUR", "Euro", 2, 1.0);
        store.insert_currency("USD", "USD", "US Dollar", 2, 1.25);
        store.insert_security("aapl", "Apple", Some("AAPL"), Some("USD"));
        store.insert_security("acme", "Acme", Some("ACME"), None);
        store.set_rate("aapl", 0.01).unwrap();
        store
            .set_tag("aapl", PRICE_DATE_TAG, "1276894800000")
            .unwrap();

        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let rendered = build_table(&store, offset).to_string();

        assert!(rendered.contains("Apple"));
        assert!(rendered.contains("125.00 USD"));
        assert!(rendered.contains("2010-06-18 16:00"));
        assert!(rendered.contains("0.010000"));
        // No price stored yet
        assert!(rendered.contains("N/A"));
    }
}
