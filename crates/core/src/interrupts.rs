// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::OutputPin;

/// Index of one interrupt source (wrap, compare match N, ...) inside an
/// aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SourceId(pub usize);

/// Index of one outgoing interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LineId(pub usize);

/// Receiver for interrupt line level changes. The aggregator pushes a
/// notification only when a line's level actually changes.
pub trait InterruptSink {
    fn on_line_change(&mut self, line: LineId, level: bool);
}

/// Sink that discards notifications; useful for internal refreshes where the
/// caller inspects line levels directly.
pub struct NullSink;

impl InterruptSink for NullSink {
    fn on_line_change(&mut self, _line: LineId, _level: bool) {}
}

#[derive(Debug, Default, serde::Serialize)]
struct Source {
    /// Latched pending state. Set on the event regardless of the enable so
    /// that enabling later still sees the pending interrupt.
    flag: bool,
    enable: bool,
}

#[derive(Debug, serde::Serialize)]
struct Line {
    sources: Vec<SourceId>,
    pin: OutputPin,
}

/// Combines latched event flags with software enables into one or more
/// outgoing lines.
///
/// Each line is the OR of `flag && enable` over its source subset, re-evaluated
/// eagerly on every flag or enable mutation. Level changes are pushed to the
/// sink exactly once per change, so redundant events (setting a flag that is
/// already set) are free.
#[derive(Debug, Default, serde::Serialize)]
pub struct InterruptAggregator {
    sources: Vec<Source>,
    lines: Vec<Line>,
}

impl InterruptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self) -> SourceId {
        self.sources.push(Source::default());
        SourceId(self.sources.len() - 1)
    }

    pub fn add_line(&mut self, sources: &[SourceId]) -> LineId {
        self.lines.push(Line {
            sources: sources.to_vec(),
            pin: OutputPin::new(),
        });
        LineId(self.lines.len() - 1)
    }

    pub fn set_flag(&mut self, source: SourceId, value: bool, sink: &mut dyn InterruptSink) {
        if self.sources[source.0].flag == value {
            return;
        }
        self.sources[source.0].flag = value;
        self.refresh(sink);
    }

    pub fn set_enable(&mut self, source: SourceId, value: bool, sink: &mut dyn InterruptSink) {
        if self.sources[source.0].enable == value {
            return;
        }
        self.sources[source.0].enable = value;
        self.refresh(sink);
    }

    pub fn flag(&self, source: SourceId) -> bool {
        self.sources[source.0].flag
    }

    pub fn enable(&self, source: SourceId) -> bool {
        self.sources[source.0].enable
    }

    /// Packed view of all flags, source 0 in bit 0.
    pub fn flag_bits(&self) -> u64 {
        self.sources
            .iter()
            .enumerate()
            .fold(0, |bits, (i, s)| bits | ((s.flag as u64) << i))
    }

    pub fn enable_bits(&self) -> u64 {
        self.sources
            .iter()
            .enumerate()
            .fold(0, |bits, (i, s)| bits | ((s.enable as u64) << i))
    }

    pub fn line_level(&self, line: LineId) -> bool {
        self.lines[line.0].pin.is_high()
    }

    /// Re-evaluate every line and push the levels that changed.
    pub fn refresh(&mut self, sink: &mut dyn InterruptSink) {
        for (index, line) in self.lines.iter_mut().enumerate() {
            let level = line
                .sources
                .iter()
                .any(|s| self.sources[s.0].flag && self.sources[s.0].enable);
            if line.pin.drive(level) {
                tracing::debug!("interrupt line {} -> {}", index, level);
                sink.on_line_change(LineId(index), level);
            }
        }
    }

    /// Hardware reset: flags and enables both clear, lines fall.
    pub fn reset(&mut self, sink: &mut dyn InterruptSink) {
        for source in &mut self.sources {
            source.flag = false;
            source.enable = false;
        }
        self.refresh(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        changes: Vec<(LineId, bool)>,
    }

    impl InterruptSink for RecordingSink {
        fn on_line_change(&mut self, line: LineId, level: bool) {
            self.changes.push((line, level));
        }
    }

    fn aggregator() -> (InterruptAggregator, SourceId, SourceId, LineId) {
        let mut agg = InterruptAggregator::new();
        let wrap = agg.add_source();
        let cc0 = agg.add_source();
        let line = agg.add_line(&[wrap, cc0]);
        (agg, wrap, cc0, line)
    }

    #[test]
    fn test_flag_without_enable_stays_latched() {
        let (mut agg, wrap, _, line) = aggregator();
        let mut sink = RecordingSink::default();

        agg.set_flag(wrap, true, &mut sink);
        assert!(!agg.line_level(line));
        assert!(agg.flag(wrap));

        // Enabling later surfaces the pending interrupt.
        agg.set_enable(wrap, true, &mut sink);
        assert!(agg.line_level(line));
        assert_eq!(sink.changes, vec![(line, true)]);
    }

    #[test]
    fn test_line_change_pushed_once() {
        let (mut agg, wrap, cc0, line) = aggregator();
        let mut sink = RecordingSink::default();
        agg.set_enable(wrap, true, &mut sink);
        agg.set_enable(cc0, true, &mut sink);

        agg.set_flag(wrap, true, &mut sink);
        agg.set_flag(wrap, true, &mut sink); // redundant
        agg.set_flag(cc0, true, &mut sink); // line already high

        assert_eq!(sink.changes, vec![(line, true)]);

        // Line falls only when every contributing flag is down.
        agg.set_flag(wrap, false, &mut sink);
        assert!(agg.line_level(line));
        agg.set_flag(cc0, false, &mut sink);
        assert!(!agg.line_level(line));
        assert_eq!(sink.changes, vec![(line, true), (line, false)]);
    }

    #[test]
    fn test_line_source_subsets() {
        let mut agg = InterruptAggregator::new();
        let wrap = agg.add_source();
        let cc0 = agg.add_source();
        let cc1 = agg.add_source();
        let all = agg.add_line(&[wrap, cc0, cc1]);
        let compares_only = agg.add_line(&[cc0, cc1]);
        let mut sink = RecordingSink::default();

        agg.set_enable(wrap, true, &mut sink);
        agg.set_flag(wrap, true, &mut sink);
        assert!(agg.line_level(all));
        assert!(!agg.line_level(compares_only));

        agg.set_enable(cc1, true, &mut sink);
        agg.set_flag(cc1, true, &mut sink);
        assert!(agg.line_level(compares_only));
    }

    #[test]
    fn test_flag_bits_packing() {
        let (mut agg, wrap, cc0, _) = aggregator();
        let mut sink = NullSink;
        agg.set_flag(cc0, true, &mut sink);
        assert_eq!(agg.flag_bits(), 0b10);
        agg.set_flag(wrap, true, &mut sink);
        assert_eq!(agg.flag_bits(), 0b11);
        agg.set_enable(wrap, true, &mut sink);
        assert_eq!(agg.enable_bits(), 0b01);
    }

    #[test]
    fn test_reset_clears_flags_and_enables() {
        let (mut agg, wrap, _, line) = aggregator();
        let mut sink = RecordingSink::default();
        agg.set_enable(wrap, true, &mut sink);
        agg.set_flag(wrap, true, &mut sink);
        assert!(agg.line_level(line));

        agg.reset(&mut sink);
        assert!(!agg.line_level(line));
        assert!(!agg.flag(wrap));
        assert!(!agg.enable(wrap));
        assert_eq!(sink.changes, vec![(line, true), (line, false)]);
    }
}
