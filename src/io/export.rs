//! CSV export of per-tick controller reports.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::engine::TickReport;

/// Column header for tick export.
const HEADER: &str = "time,loop,soc_pct,pv_w,consumption_w,net_usage_w,\
                      target_pct,switched_on,switched_off,inverter";

/// Exports tick reports to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(reports: &[TickReport], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(reports, buf)
}

/// Writes tick reports as CSV to any writer.
///
/// Readings that were not available in a tick are left empty. Switch and
/// inverter columns list the tick's actions separated by `;`.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(reports: &[TickReport], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(',').map(str::trim))?;

    let opt = |v: Option<f32>| v.map_or_else(String::new, |v| format!("{v:.1}"));
    for r in reports {
        let switched = |on: bool| {
            r.switches
                .iter()
                .filter(|s| s.turn_on == on)
                .map(|s| s.device_id.as_str())
                .collect::<Vec<_>>()
                .join(";")
        };
        wtr.write_record(&[
            r.time.format("%Y-%m-%dT%H:%M").to_string(),
            r.loop_counter.to_string(),
            opt(r.soc_pct),
            opt(r.pv_w),
            opt(r.consumption_w),
            opt(r.net_usage_w),
            r.target_pct.to_string(),
            switched(true),
            switched(false),
            r.inverter
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
