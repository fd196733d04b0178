//! Projected SoC chart: the simulated curve shifted by the chosen target.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use super::battery::BatteryParameters;
use super::trajectory::SimulatedTrajectory;
use crate::clock::format_hhmm;

const HEADER: &str = "day,time,calculated_pct,adjusted_pct,max_pct,reserve_pct";

/// One chart point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRow {
    pub day: usize,
    pub time: String,
    /// Simulated value relative to the reserve seed.
    pub calculated: i32,
    /// Expected SoC once the overnight charge has reached the target.
    pub adjusted: i32,
    pub upper: i32,
    pub reserve: i32,
}

/// Chart series for both simulated days.
#[derive(Debug, Clone, Default)]
pub struct SocChart {
    pub rows: Vec<ChartRow>,
}

impl SocChart {
    /// Builds the chart from a trajectory and the committed target.
    ///
    /// The adjusted curve is the calculated one lifted by the target. It is
    /// capped at 100 by shrinking the offset whenever it would overflow (the
    /// battery simply stops charging), and day 2 continues from wherever day
    /// 1 ended.
    pub fn build(
        trajectory: &SimulatedTrajectory,
        battery: &BatteryParameters,
        target_pct: u8,
    ) -> Self {
        let reserve = battery.reserve_pct as i32;
        let mut offset = i32::from(target_pct);
        let mut last_adjusted = offset;
        let mut rows = Vec::new();

        for (day, values) in trajectory.days.iter().enumerate() {
            for (slot, kwh) in values.iter().enumerate() {
                let calculated = battery.to_pct(*kwh);
                if day > 0 && slot == 0 {
                    offset = last_adjusted - calculated;
                }
                if calculated + offset > 100 {
                    offset = 100 - calculated;
                }
                let adjusted = (calculated + offset).clamp(0, 100);
                last_adjusted = adjusted;
                rows.push(ChartRow {
                    day: day + 1,
                    time: format_hhmm(slot as u32 * trajectory.slot_minutes),
                    calculated,
                    adjusted,
                    upper: 100,
                    reserve,
                });
            }
        }
        Self { rows }
    }

    /// Writes the chart to a CSV file.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the file cannot be created or written.
    pub fn export_csv(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        self.write_csv(io::BufWriter::new(file))
    }

    /// Writes the chart as CSV to any writer.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if writing fails.
    pub fn write_csv(&self, writer: impl Write) -> io::Result<()> {
        let mut wtr = csv::WriterBuilder::new().from_writer(writer);
        wtr.write_record(HEADER.split(','))?;
        for r in &self.rows {
            wtr.write_record(&[
                r.day.to_string(),
                r.time.clone(),
                r.calculated.to_string(),
                r.adjusted.to_string(),
                r.upper.to_string(),
                r.reserve.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soc::trajectory::DayExtremes;

    fn battery() -> BatteryParameters {
        BatteryParameters::new(10.0, 1.0, 3.0, 4.0, 50.0)
    }

    fn trajectory(days: Vec<Vec<f32>>) -> SimulatedTrajectory {
        let extremes = days
            .iter()
            .map(|_| DayExtremes {
                max_pct: 0,
                min_pct: 0,
                max_slot: 0,
                min_slot: 0,
            })
            .collect();
        SimulatedTrajectory {
            slot_minutes: 720,
            days,
            extremes,
        }
    }

    #[test]
    fn adjusted_curve_is_capped_and_continues_across_days() {
        // calculated 0%, 80%, then day two 10%, -20%
        let t = trajectory(vec![vec![0.0, 8.0], vec![1.0, -2.0]]);
        let chart = SocChart::build(&t, &battery(), 40);
        let adjusted: Vec<i32> = chart.rows.iter().map(|r| r.adjusted).collect();
        // 0+40, then capped at 100 (offset 20), day two starts at 100, then -30 lower
        assert_eq!(adjusted, vec![40, 100, 100, 70]);
        assert_eq!(chart.rows[1].time, "12:00");
        assert_eq!(chart.rows[3].day, 2);
    }

    #[test]
    fn adjusted_curve_never_leaves_bounds() {
        let t = trajectory(vec![vec![0.0, -9.0]]);
        let chart = SocChart::build(&t, &battery(), 20);
        assert_eq!(chart.rows[1].adjusted, 0);
    }

    #[test]
    fn csv_has_header_and_rows() {
        let t = trajectory(vec![vec![0.0, 1.0]]);
        let mut buf = Vec::new();
        SocChart::build(&t, &battery(), 50).write_csv(&mut buf).ok();
        let text = String::from_utf8(buf).unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "1,12:00,10,60,100,4");
    }
}
