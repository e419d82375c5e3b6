use std::fmt::Write;

use crate::kernel::{Interval, Schedule};

fn label(interval: &Interval) -> String {
    match interval.pid {
        Some(pid) => format!("P{}", pid),
        None => "IDLE".to_string(),
    }
}

/// `[P1 0-1] [P2 1-4] ...`
pub fn render_timeline(schedule: &Schedule) -> String {
    schedule
        .timeline
        .iter()
        .map(|interval| format!("[{} {}-{}]", label(interval), interval.start, interval.end))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Columns the Gantt bar aims for; short runs get two per tick instead.
const GANTT_COLUMNS: u128 = 80;

fn centered(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.len());
    format!("{}{}{}", " ".repeat(pad / 2), text, " ".repeat(pad - pad / 2))
}

/// A two-line text Gantt bar. Each tick is two columns wide while the run
/// fits in the column budget; longer runs are scaled down to it. Every
/// interval stays wide enough for its label and its start time.
///
/// ```text
/// |P1|  P2  |   P1   |P3|
/// 0  1      4        8  9
/// ```
pub fn render_gantt(schedule: &Schedule) -> String {
    let total = u128::from(schedule.summary.total_time.max(1));
    let mut bar = String::from("|");
    let mut axis = String::new();

    for interval in &schedule.timeline {
        let name = label(interval);
        let start = interval.start.to_string();

        let len = u128::from(interval.len());
        let scaled = if total * 2 <= GANTT_COLUMNS {
            len * 2
        } else {
            (len * GANTT_COLUMNS).div_ceil(total)
        };
        let width = usize::try_from(scaled)
            .unwrap_or(usize::MAX)
            .max(name.len())
            .max(start.len());

        bar.push_str(&centered(&name, width));
        bar.push('|');

        axis.push_str(&start);
        axis.push_str(&" ".repeat(width + 1 - start.len()));
    }

    if let Some(last) = schedule.timeline.last() {
        axis.push_str(&last.end.to_string());
    }

    format!("{}\n{}", bar, axis)
}

/// Per-process metrics, the averages row and a one-line summary.
pub fn render_metrics(schedule: &Schedule) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<8}{:>8}{:>7}{:>10}{:>7}{:>12}{:>12}{:>9}{:>10}",
        "PID", "Arrival", "Burst", "Priority", "Start", "Completion", "Turnaround", "Waiting", "Response"
    );

    for metrics in &schedule.processes {
        let _ = writeln!(
            out,
            "{:<8}{:>8}{:>7}{:>10}{:>7}{:>12}{:>12}{:>9}{:>10}",
            format!("P{}", metrics.pid),
            metrics.arrival,
            metrics.burst,
            metrics.priority,
            metrics.first_dispatch,
            metrics.completion,
            metrics.turnaround,
            metrics.waiting,
            metrics.response
        );
    }

    let summary = &schedule.summary;
    let _ = writeln!(
        out,
        "{:<52}{:>12.2}{:>9.2}{:>10.2}",
        "Average", summary.avg_turnaround, summary.avg_waiting, summary.avg_response
    );

    let _ = write!(
        out,
        "{}: total time {}, busy {}, utilization {:.1}%, throughput {:.3}/tick, preemptions {}",
        schedule.algorithm,
        summary.total_time,
        summary.busy_time,
        summary.utilization * 100.0,
        summary.throughput,
        summary.preemptions
    );

    out
}

/// Everything the `schedule` built-in prints, newline terminated.
pub fn render_schedule(schedule: &Schedule, gantt: bool) -> String {
    let mut out = String::new();

    out.push_str(&render_timeline(schedule));
    out.push('\n');
    if gantt {
        out.push('\n');
        out.push_str(&render_gantt(schedule));
        out.push_str("\n\n");
    }
    out.push_str(&render_metrics(schedule));
    out.push('\n');

    out
}

/// Pretty JSON with the policy, intervals, per-process metrics, summary
/// and event log.
pub fn export_json(schedule: &Schedule) -> serde_json::Result<String> {
    let mut json = serde_json::to_string_pretty(schedule)?;
    json.push('\n');
    Ok(json)
}

/// One CSV table: an `interval` row per timeline entry, then a `process`
/// row per process. Columns that do not apply to a row are left empty.
pub fn export_csv(schedule: &Schedule) -> String {
    let mut out = String::from(
        "kind,pid,start,end,arrival,burst,priority,first_dispatch,completion,turnaround,waiting,response\n",
    );

    for interval in &schedule.timeline {
        let _ = writeln!(
            out,
            "interval,{},{},{},,,,,,,,",
            label(interval),
            interval.start,
            interval.end
        );
    }
    for metrics in &schedule.processes {
        let _ = writeln!(
            out,
            "process,P{},,,{},{},{},{},{},{},{},{}",
            metrics.pid,
            metrics.arrival,
            metrics.burst,
            metrics.priority,
            metrics.first_dispatch,
            metrics.completion,
            metrics.turnaround,
            metrics.waiting,
            metrics.response
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kernel::{compute_schedule, ProcessSpec, SchedulingAlgorithm};

    fn scenario() -> Schedule {
        let specs = vec![
            ProcessSpec::new(1, 0, 5, 2),
            ProcessSpec::new(2, 1, 3, 1),
            ProcessSpec::new(3, 2, 1, 3),
        ];
        compute_schedule(&specs, SchedulingAlgorithm::Priority { preemptive: true }).unwrap()
    }

    #[test]
    fn test_report_timeline() {
        assert_eq!(render_timeline(&scenario()), "[P1 0-1] [P2 1-4] [P1 4-8] [P3 8-9]");

        let idle = compute_schedule(&[ProcessSpec::new(4, 2, 1, 0)], SchedulingAlgorithm::Fcfs).unwrap();
        assert_eq!(render_timeline(&idle), "[IDLE 0-2] [P4 2-3]");
    }

    #[test]
    fn test_report_gantt_axis_lines_up() {
        let gantt = render_gantt(&scenario());
        let lines: Vec<&str> = gantt.lines().collect();

        assert_eq!(lines[0], "|P1|  P2  |   P1   |P3|");
        assert_eq!(lines[1], "0  1      4        8  9");
    }

    #[test]
    fn test_report_gantt_scales_long_runs() {
        let long = compute_schedule(&[ProcessSpec::new(1, 0, 40_000, 0)], SchedulingAlgorithm::Fcfs).unwrap();
        let gantt = render_gantt(&long);
        let lines: Vec<&str> = gantt.lines().collect();

        assert_eq!(lines[0], format!("|{}P1{}|", " ".repeat(39), " ".repeat(39)));
        assert_eq!(lines[1], format!("0{}40000", " ".repeat(80)));

        let specs = vec![ProcessSpec::new(1, 0, 30_000, 0), ProcessSpec::new(2, 10, 10_000, 0)];
        let split = compute_schedule(&specs, SchedulingAlgorithm::Fcfs).unwrap();
        let gantt = render_gantt(&split);
        let lines: Vec<&str> = gantt.lines().collect();

        assert_eq!(lines[0].len(), 1 + 60 + 1 + 20 + 1);
        assert!(lines[1].starts_with("0"));
        assert!(lines[1].ends_with(&format!("30000{}40000", " ".repeat(16))));
    }

    #[test]
    fn test_report_metrics_table() {
        let table = render_metrics(&scenario());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("PID"));
        assert!(lines[1].starts_with("P1"));
        assert!(lines[1].split_whitespace().eq(["P1", "0", "5", "2", "0", "8", "8", "3", "0"]));
        assert!(lines[4].split_whitespace().eq(["Average", "6.00", "3.00", "2.00"]));
        assert!(lines[5].starts_with("Priority (preemptive): total time 9, busy 9, utilization 100.0%"));
        assert!(lines[5].ends_with("preemptions 1"));
    }

    #[test]
    fn test_report_export_json() {
        let json = export_json(&scenario()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["algorithm"]["name"], "priority");
        assert_eq!(value["algorithm"]["preemptive"], true);
        assert_eq!(value["timeline"][1]["pid"], 2);
        assert_eq!(value["processes"][2]["waiting"], 6);
        assert_eq!(value["summary"]["preemptions"], 1);
        assert!(value["events"].as_array().is_some_and(|events| !events.is_empty()));
    }

    #[test]
    fn test_report_export_csv() {
        let csv = export_csv(&scenario());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 1 + 4 + 3);
        assert!(lines[0].starts_with("kind,pid,start,end,"));
        assert_eq!(lines[1], "interval,P1,0,1,,,,,,,,");
        assert_eq!(lines[4], "interval,P3,8,9,,,,,,,,");
        assert_eq!(lines[5], "process,P1,,,0,5,2,0,8,8,3,0");
        assert_eq!(lines[7], "process,P3,,,2,1,3,8,9,7,6,6");
        assert!(lines.iter().all(|line| line.split(',').count() == 12));
    }
}
