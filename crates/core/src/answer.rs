use crate::CountReport;

/// User-facing sentence for a count.
pub fn format_count_answer(count: usize, concept: &str) -> String {
    let noun = if count == 1 { "sentencia que menciona" } else { "sentencias que mencionan" };
    format!("En la base hay **{count}** {noun} {concept}.")
}

/// Multi-line breakdown of a report, for `--explain` output.
pub fn explain_report(report: &CountReport) -> String {
    let mut lines = vec![
        format!("concept: {}", report.concept),
        format!("terms: {}", report.terms.join(", ")),
        format!("retrieved_hits: {}", report.retrieved_hits),
        format!("confident_documents: {}", report.confident),
        format!("grey_candidates: {}", report.grey),
        format!("adjudicated_documents: {}", report.adjudicated),
        format!("count: {}", report.count),
    ];
    for degradation in &report.degradations {
        lines.push(format!("degraded: {degradation}"));
    }
    lines.join("\n")
}
