//! Statistics report writer.

use std::io::Write;

use anyhow::Result;

use crate::{job::CompletedJob, stats::ExecData, taskset::CompletedTaskset, utils::pretty_time};

const NAME_WIDTH: usize = 30;
const VALUE_WIDTH: usize = 20;

fn write_header<W: Write>(w: &mut W) -> Result<()> {
    writeln!(
        w,
        "   {:>nw$}{:>vw$}{:>vw$}{:>vw$}{:>vw$}{:>vw$}",
        "name",
        "count",
        "min",
        "mean",
        "median",
        "max",
        nw = NAME_WIDTH,
        vw = VALUE_WIDTH
    )?;

    Ok(())
}

fn write_row<W: Write>(w: &mut W, data: &ExecData) -> Result<()> {
    writeln!(
        w,
        " - {:>nw$}{:>vw$}{:>vw$}{:>vw$.3}{:>vw$.3}{:>vw$}",
        data.name,
        data.count,
        data.min,
        data.mean,
        data.median,
        data.max,
        nw = NAME_WIDTH,
        vw = VALUE_WIDTH
    )?;

    Ok(())
}

/// Writes the statistics table of `taskset`, followed by the raw samples of
/// every statistic.
pub fn write_stats<W: Write>(w: &mut W, taskset: &CompletedTaskset) -> Result<()> {
    writeln!(
        w,
        "taskset {}: {} tasks, {} jobs, cpus {:?}",
        taskset.id,
        taskset.tasks.len(),
        taskset.jobs.len(),
        taskset.cpu_ids
    )?;
    writeln!(
        w,
        "from {} to {} ({}ns)",
        pretty_time(taskset.init_time),
        pretty_time(taskset.completion_time),
        taskset.duration()
    )?;

    let misses = taskset.jobs.iter().filter(|j| j.missed_deadline()).count();
    let worst = taskset.jobs.iter().map(CompletedJob::response_time).max();

    writeln!(
        w,
        "{} deadline miss(es), worst response time {}",
        misses,
        worst.map_or_else(|| "-".to_owned(), |t| format!("{}ns", t))
    )?;
    writeln!(w)?;

    write_header(w)?;
    for data in &taskset.exec_data {
        write_row(w, data)?;
    }

    writeln!(w)?;
    writeln!(w, "SAMPLES:")?;

    for data in &taskset.exec_data {
        let samples: Vec<String> = data.samples.iter().map(|s| s.to_string()).collect();

        writeln!(w, "{}: [{}]", data.name, samples.join(", "))?;
    }

    Ok(())
}
