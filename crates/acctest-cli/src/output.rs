use acctest_runner::catalog::qualified;
use acctest_runner::{RunReport, Scenario, ScenarioOutcome, ScenarioReport};

pub fn render_catalog(scenarios: &[Scenario]) -> String {
    let width = scenarios
        .iter()
        .map(|s| qualified(s).len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for s in scenarios {
        let flag = if s.requires_import_feature { "  [requires import]" } else { "" };
        out.push_str(&format!(
            "{:<width$}  {}{}\n",
            qualified(s),
            s.resource_type,
            flag,
            width = width
        ));
    }
    out
}

fn render_scenario(s: &ScenarioReport) -> String {
    let elapsed = (s.finished_at - s.started_at).num_milliseconds() as f64 / 1000.0;
    let head = match &s.outcome {
        ScenarioOutcome::Passed => format!("PASS  {} ({}) {:.1}s", s.name, s.resource_type, elapsed),
        ScenarioOutcome::Skipped(reason) => {
            format!("SKIP  {} ({}): {}", s.name, s.resource_type, reason)
        }
        ScenarioOutcome::Failed(e) => format!(
            "FAIL  {} ({}) {:.1}s\n      {}",
            s.name,
            s.resource_type,
            elapsed,
            e.to_string().replace('\n', "\n      ")
        ),
    };
    match &s.teardown {
        Some(t) => format!("{}\n      teardown: {}\n", head, t),
        None => format!("{}\n", head),
    }
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for s in &report.scenarios {
        out.push_str(&render_scenario(s));
    }
    out.push_str(&format!(
        "\n{} passed, {} failed, {} skipped ({} engine, run {})\n",
        report.passed(),
        report.failed(),
        report.skipped(),
        report.engine,
        report.run_id
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use acctest_runner::{catalog, ScenarioError};

    #[test]
    fn catalog_lists_flag() {
        let text = render_catalog(&catalog());
        let line = text
            .lines()
            .find(|l| l.starts_with("storage_share/requires_import"))
            .unwrap();
        assert!(line.ends_with("[requires import]"));
        assert!(line.contains("azurerm_storage_share"));
    }

    #[test]
    fn failure_indents_error_and_teardown() {
        let mut s = ScenarioReport::new("disappears", "azurerm_storage_share");
        s.outcome = ScenarioOutcome::Failed(ScenarioError::StillExists {
            address: "azurerm_storage_share.test".into(),
            parent: "azurerm_storage_account acctestacc1".into(),
            observed: "{\n  \"name\": \"x\"\n}".into(),
        });
        s.teardown = Some("destroy: boom".into());
        let text = render_scenario(&s);
        assert!(text.starts_with("FAIL  disappears (azurerm_storage_share)"));
        assert!(text.contains("\n        \"name\": \"x\""));
        assert!(text.ends_with("teardown: destroy: boom\n"));
    }
}
