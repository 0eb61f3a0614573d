//! Per-pipeline aggregation.

use crate::models::{PipelineRun, PipelineSummary};
use std::cmp::Ordering;
use std::collections::HashMap;

type GroupKey = (Option<String>, Option<String>, Option<String>, Option<String>);

#[derive(Default)]
struct Accumulator {
    total_runs: u64,
    last_run: Option<chrono::DateTime<chrono::Utc>>,
    duration_sum: f64,
    duration_count: u64,
    rowcount_sum: f64,
    rowcount_count: u64,
}

impl Accumulator {
    fn add(&mut self, run: &PipelineRun) {
        self.total_runs += 1;
        self.last_run = self.last_run.max(Some(run.start_utc));
        if run.elapsed_seconds > 0.0 {
            self.duration_sum += run.elapsed_seconds;
            self.duration_count += 1;
        }
        if run.rowcount > 0 {
            self.rowcount_sum += run.rowcount as f64;
            self.rowcount_count += 1;
        }
    }

    fn finish(self, key: GroupKey) -> PipelineSummary {
        let (pipeline_name, script_name, pipeline_type, environment) = key;
        PipelineSummary {
            pipeline_name,
            script_name,
            pipeline_type,
            environment,
            total_runs: self.total_runs,
            last_run: self.last_run,
            avg_duration: mean(self.duration_sum, self.duration_count),
            avg_rowcount: mean(self.rowcount_sum, self.rowcount_count),
        }
    }
}

fn mean(sum: f64, count: u64) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

/// Most recent first; groups without a `last_run` go last.
pub(crate) fn by_last_run_desc(a: &PipelineSummary, b: &PipelineSummary) -> Ordering {
    match (a.last_run, b.last_run) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Group runs by (pipeline_name, script_name, pipeline_type, environment).
///
/// Groups are formed in first-seen order and then stably sorted by `last_run`.
pub fn summarize(runs: &[PipelineRun]) -> Vec<PipelineSummary> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(GroupKey, Accumulator)> = Vec::new();

    for run in runs {
        let key = (
            run.pipeline_name.clone(),
            run.script_name.clone(),
            run.pipeline_type.clone(),
            run.environment.clone(),
        );
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Accumulator::default()));
            groups.len() - 1
        });
        groups[slot].1.add(run);
    }

    let mut summaries: Vec<PipelineSummary> = groups
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect();
    summaries.sort_by(by_last_run_desc);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::run_at;

    #[test]
    fn test_averages_ignore_non_positive_values() {
        let runs: Vec<PipelineRun> = [(10.0, 5), (20.0, 15), (0.0, 0)]
            .iter()
            .enumerate()
            .map(|(i, &(elapsed, rows))| {
                let mut run = run_at(&format!("r{}", i), i as i64);
                run.elapsed_seconds = elapsed;
                run.rowcount = rows;
                run
            })
            .collect();

        let summaries = summarize(&runs);
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.total_runs, 3);
        assert_eq!(s.avg_duration, Some(15.0));
        assert_eq!(s.avg_rowcount, Some(10.0));
        assert_eq!(s.last_run, Some(runs[2].start_utc));
    }

    #[test]
    fn test_all_zero_group_has_null_averages() {
        let mut run = run_at("z", 0);
        run.elapsed_seconds = 0.0;
        run.rowcount = 0;
        let s = &summarize(&[run])[0];
        assert_eq!(s.avg_duration, None);
        assert_eq!(s.avg_rowcount, None);
    }

    #[test]
    fn test_groups_sorted_by_last_run_desc() {
        let old = run_at("old", 0);
        let mut new = run_at("new", 60);
        new.environment = Some("dev".to_string());
        let mut null_group = run_at("nulls", 30);
        null_group.pipeline_name = None;

        let summaries = summarize(&[old, null_group, new]);
        let envs: Vec<_> = summaries
            .iter()
            .map(|s| (s.pipeline_name.as_deref(), s.environment.as_deref()))
            .collect();
        assert_eq!(
            envs,
            vec![
                (Some("sales_etl"), Some("dev")),
                (None, Some("prod")),
                (Some("sales_etl"), Some("prod")),
            ]
        );
    }

    #[test]
    fn test_null_last_run_sorts_last() {
        let mut with = summarize(&[run_at("a", 0)]);
        let mut without = with[0].clone();
        without.last_run = None;
        without.pipeline_name = None;
        with.insert(0, without);
        with.sort_by(by_last_run_desc);
        assert!(with[0].last_run.is_some());
        assert!(with[1].last_run.is_none());
    }
}
