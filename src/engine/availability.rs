use crate::model::*;

// ── Free time ─────────────────────────────────────────────────────

/// Gaps in a schedule inside `window`.
///
/// Busy spans are clamped to the window, merged, then subtracted. Gaps shorter
/// than `min_duration` are dropped.
pub fn free_spans(busy: &[Span], window: &Span, min_duration: Ms) -> Vec<Span> {
    let mut clamped: Vec<Span> = busy
        .iter()
        .filter(|s| s.overlaps(window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    let merged = merge_overlapping(&clamped);

    subtract_intervals(&[*window], &merged)
        .into_iter()
        .filter(|s| s.duration_ms() >= min_duration)
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Both inputs sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── free_spans ───────────────────────────────────────

    #[test]
    fn empty_schedule_is_all_free() {
        let day = Span::new(9 * H, 17 * H);
        assert_eq!(free_spans(&[], &day, 0), vec![day]);
    }

    #[test]
    fn appointments_punch_holes() {
        let day = Span::new(9 * H, 12 * H);
        let busy = [Span::new(10 * H, 10 * H + 30 * M)];
        assert_eq!(
            free_spans(&busy, &day, 0),
            vec![Span::new(9 * H, 10 * H), Span::new(10 * H + 30 * M, 12 * H)]
        );
    }

    #[test]
    fn busy_outside_window_is_clamped() {
        let day = Span::new(9 * H, 12 * H);
        let busy = [Span::new(8 * H, 9 * H + 15 * M), Span::new(11 * H + 45 * M, 13 * H)];
        assert_eq!(
            free_spans(&busy, &day, 0),
            vec![Span::new(9 * H + 15 * M, 11 * H + 45 * M)]
        );
    }

    #[test]
    fn short_gaps_are_dropped() {
        let day = Span::new(9 * H, 11 * H);
        let busy = [
            Span::new(9 * H + 10 * M, 10 * H),
            Span::new(10 * H + 50 * M, 11 * H),
        ];
        assert_eq!(
            free_spans(&busy, &day, 30 * M),
            vec![Span::new(10 * H, 10 * H + 50 * M)]
        );
    }

    #[test]
    fn unsorted_busy_input() {
        let day = Span::new(0, 10 * H);
        let busy = [Span::new(6 * H, 7 * H), Span::new(H, 2 * H), Span::new(H + 30 * M, 3 * H)];
        assert_eq!(
            free_spans(&busy, &day, 0),
            vec![Span::new(0, H), Span::new(3 * H, 6 * H), Span::new(7 * H, 10 * H)]
        );
    }
}
