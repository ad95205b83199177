//! Instruction preamble and task prompt.

use std::time::Duration;

use forecastor_core::budget::format_duration;
use forecastor_core::{Budget, CompetitionContext, TableInfo};

fn describe_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        3600 => "1 hour".to_string(),
        s if s > 0 && s % 3600 == 0 => format!("{} hours", s / 3600),
        _ => format_duration(d),
    }
}

pub fn instructions(budget: &Budget) -> String {
    format!(
        r#"ADDITIONAL NOTES
------

- **Total Runtime**: You have a maximum of {runtime} to attempt this task. You may iteratively develop your solution within this time frame, but bear in mind that program runtime also counts towards this limit.
- **Total Steps**: You have a maximum of {steps} steps to submit your solution.
- You will be informed of the remaining time and steps at each step.
- **Use as much of the available time as possible to refine and optimize your submission**: Your goal is to achieve the best possible score, not just to submit your first working solution.
Therefore, while you are provided with a "final_answer" tool, you should not use it unless you are certain that no further improvements can be made. Consider strategies like validating your answer using the "validate_submission" tool, manually spot-checking predictions, building custom validation sets and grading functions, and comparing different algorithms. You may keep working until the time limit expires -- as long as your best submission is stored at the designated location at the end of your run, it will be picked up for grading.
You can generate plots of the data under file 'plot.png', then you will be able to view them
"#,
        runtime = describe_duration(budget.max_duration),
        steps = budget.max_steps,
    )
}

fn describe_table(var: &str, table: &TableInfo) -> String {
    format!(
        "- `{}`: {} rows, columns: {}",
        var,
        table.row_count,
        table.columns.join(", ")
    )
}

pub fn build_task(context: &CompetitionContext, leaderboard_rows: usize) -> String {
    let competition = &context.competition;
    let mut task = format!(
        r#"You are given a Kaggle competition, your goal is to make predictions for the table test_dataframe provided below, and write this submission under the `submission.csv` file.
To do so, generate and execute a full script that will produce the submission file.

# {name}

{description}

Sample submission file:
```csv
{sample}
```

You can use the provided dataframe train_dataframe to train your model.
The following pandas DataFrames are preloaded in the code execution environment:
{train}
{test}
"#,
        name = competition.name,
        description = competition.description.trim(),
        sample = context.sample_submission_preview.trim_end(),
        train = describe_table("train_dataframe", &context.train),
        test = describe_table("test_dataframe", &context.test),
    );

    let head = context.leaderboard_head(leaderboard_rows);
    if !head.is_empty() {
        let scores: Vec<String> = head.iter().map(|s| s.to_string()).collect();
        task.push_str(&format!(
            "\nTop {} of {} leaderboard scores: {}\n",
            head.len(),
            competition.leaderboard.len(),
            scores.join(", ")
        ));
    }

    task.push_str("\n\nNow go on!\n");
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecastor_core::Competition;
    use std::path::PathBuf;

    fn context(leaderboard: Vec<f64>) -> CompetitionContext {
        CompetitionContext {
            competition: Competition {
                id: "ventilator-pressure-prediction".into(),
                name: "Google Brain - Ventilator Pressure Prediction".into(),
                description: "Simulate a ventilator.\n".into(),
                public_dir: PathBuf::new(),
                sample_submission: PathBuf::new(),
                leaderboard,
            },
            train: TableInfo {
                name: "train".into(),
                path: PathBuf::from("train.csv"),
                columns: vec!["id".into(), "u_in".into(), "pressure".into()],
                row_count: 6,
            },
            test: TableInfo {
                name: "test".into(),
                path: PathBuf::from("test.csv"),
                columns: vec!["id".into(), "u_in".into()],
                row_count: 4,
            },
            sample_submission_preview: "id,pressure\n1,0\n".into(),
        }
    }

    #[test]
    fn test_instructions_reflect_budget() {
        let text = instructions(&Budget::new(500, Duration::from_secs(86_400)));
        assert!(text.starts_with("ADDITIONAL NOTES"));
        assert!(text.contains("maximum of 24 hours"));
        assert!(text.contains("maximum of 500 steps"));
        assert!(text.contains("plot.png"));

        let short = instructions(&Budget::new(3, Duration::from_secs(90)));
        assert!(short.contains("maximum of 1m 30s"));
    }

    #[test]
    fn test_task_contains_competition_material() {
        let task = build_task(&context(vec![0.1, 0.2, 0.3]), 2);
        assert!(task.contains("# Google Brain - Ventilator Pressure Prediction"));
        assert!(task.contains("```csv\nid,pressure\n1,0\n```"));
        assert!(task.contains("`train_dataframe`: 6 rows, columns: id, u_in, pressure"));
        assert!(task.contains("Top 2 of 3 leaderboard scores: 0.1, 0.2"));
        assert!(task.contains("submission.csv"));
    }

    #[test]
    fn test_task_without_leaderboard() {
        let task = build_task(&context(vec![]), 10);
        assert!(!task.contains("leaderboard"));
    }
}
