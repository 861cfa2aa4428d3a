//! The reconciliation core: applies a [`MutationQueue`] to raw hosts-file
//! text and produces the rewritten body.
//!
//! Lines the queue does not touch round-trip byte for byte. Comment and
//! blank lines pass through untouched; record lines keep their original
//! inter-token spacing for every hostname that survives, with a single
//! space for positions that did not exist before. Records whose hostname
//! list empties out are dropped entirely, and IPs queued for addition but
//! absent from the file are inserted after the last record line, ahead of
//! any trailing comment block.

use crate::config::LineEnding;
use crate::queue::{MutationQueue, Removal};

/// One parsed line of the input.
///
/// `Verbatim` covers blank (including whitespace-only) and `#`-comment
/// lines. Everything else is a record: the first whitespace-delimited
/// token is the IP, the rest are hostnames, and the whitespace runs are
/// kept positionally for re-serialization.
#[derive(Debug)]
enum Line {
    Verbatim(String),
    Record(Record),
}

#[derive(Debug)]
struct Record {
    ip: String,
    hosts: Vec<String>,
    gaps: Vec<String>,
}

fn is_verbatim(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

/// Split a record line into tokens and the whitespace runs between them.
///
/// Edge whitespace produces an empty token on that side, so a line with
/// leading or trailing spaces reassembles to itself: tokens and gaps
/// strictly alternate starting with a token.
fn split_tokens(line: &str) -> (Vec<String>, Vec<String>) {
    let mut tokens = Vec::new();
    let mut gaps = Vec::new();
    let mut current = String::new();
    let mut in_gap = false;

    for ch in line.chars() {
        if ch.is_whitespace() == in_gap {
            current.push(ch);
        } else {
            if in_gap {
                gaps.push(std::mem::take(&mut current));
            } else {
                tokens.push(std::mem::take(&mut current));
            }
            in_gap = !in_gap;
            current.push(ch);
        }
    }
    if in_gap {
        gaps.push(current);
        tokens.push(String::new());
    } else {
        tokens.push(current);
    }

    (tokens, gaps)
}

fn parse(line: &str) -> Line {
    if is_verbatim(line) {
        return Line::Verbatim(line.to_string());
    }
    let (mut tokens, gaps) = split_tokens(line);
    let ip = tokens.remove(0);
    Line::Record(Record {
        ip,
        hosts: tokens,
        gaps,
    })
}

impl Record {
    /// Apply the queue to this record's hostname list.
    ///
    /// Global host removals hit every line in the pass. Additions and
    /// specific removals are consumed by the first line carrying their IP;
    /// a wildcard removal stays live for later duplicate-IP lines.
    fn apply(&mut self, queue: &mut MutationQueue) {
        self.hosts.retain(|h| !queue.host_removals.contains(h));

        if let Some(queued) = queue.additions.shift_remove(&self.ip) {
            let fresh: Vec<String> = queued
                .into_iter()
                .filter(|h| !self.hosts.contains(h))
                .collect();
            self.hosts.extend(fresh);
        }

        match queue.removals.get_mut(&self.ip) {
            Some(Removal::All) => self.hosts.clear(),
            Some(Removal::Names(names)) => {
                for name in names.drain(..) {
                    self.hosts.retain(|h| *h != name);
                }
            }
            None => {}
        }
    }

    /// At least one real hostname left. Empty edge tokens from leading or
    /// trailing whitespace do not count.
    fn has_hosts(&self) -> bool {
        self.hosts.iter().any(|h| !h.is_empty())
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(self.ip.len() + self.hosts.len() * 8);
        out.push_str(&self.ip);
        out.push_str(self.gap(0));
        for (i, host) in self.hosts.iter().enumerate() {
            if i > 0 {
                out.push_str(self.gap(i));
            }
            out.push_str(host);
        }
        out
    }

    fn gap(&self, i: usize) -> &str {
        self.gaps.get(i).map(String::as_str).unwrap_or(" ")
    }
}

/// Where brand-new records go: after the last record line, skipping the
/// trailing blank/comment block. Stops at index 0 even when line 0 is not
/// a record, so a file of nothing but comments gets insertions at index 1.
fn insertion_index(lines: &[String]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    let mut idx = lines.len() - 1;
    while idx > 0 && is_verbatim(&lines[idx]) {
        idx -= 1;
    }
    idx + 1
}

/// Merge `queue` into `input` and return the rewritten body, joined with
/// `eol`. The queue is drained: consumed entries as the pass walks the
/// lines, everything remaining when the pass ends.
///
/// Input is split on `\n`, stripping the `\r` of a `\r\n` pair, so both
/// separator conventions parse; output uses `eol` uniformly. A `\r` not
/// followed by `\n` is ordinary whitespace and stays in its line.
pub fn reconcile(input: &str, queue: &mut MutationQueue, eol: LineEnding) -> String {
    let mut lines: Vec<String> = Vec::new();

    let mut raw_lines = input.split('\n').peekable();
    while let Some(raw) = raw_lines.next() {
        // Only a \r paired with a following \n is part of the separator;
        // one ending the unterminated final line is content.
        let raw = if raw_lines.peek().is_some() {
            raw.strip_suffix('\r').unwrap_or(raw)
        } else {
            raw
        };
        match parse(raw) {
            Line::Verbatim(line) => lines.push(line),
            Line::Record(mut record) => {
                record.apply(queue);
                if record.has_hosts() {
                    lines.push(record.render());
                }
                // Dropped records leave no trace, not even a blank line.
            }
        }
    }

    // Unconsumed additions are IPs with no line in the file. The insertion
    // scan only runs when there are any, so an empty queue never perturbs
    // the document.
    if !queue.additions.is_empty() {
        let mut at = if lines.first().is_some_and(|l| l.is_empty()) {
            // Compatibility case: a document opening with a blank line has
            // no layout worth anchoring to. The blank is discarded and new
            // records go to the very top.
            lines.remove(0);
            0
        } else {
            insertion_index(&lines)
        };
        for (ip, hosts) in &queue.additions {
            lines.insert(at, format!("{ip} {}", hosts.join(" ")));
            at += 1;
        }
    }

    queue.clear();
    lines.join(eol.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str, setup: impl FnOnce(&mut MutationQueue)) -> String {
        let mut queue = MutationQueue::new();
        setup(&mut queue);
        reconcile(input, &mut queue, LineEnding::Lf)
    }

    #[test]
    fn split_tokens_plain_line() {
        let (tokens, gaps) = split_tokens("1.2.3.4 a\tb");
        assert_eq!(tokens, ["1.2.3.4", "a", "b"]);
        assert_eq!(gaps, [" ", "\t"]);
    }

    #[test]
    fn split_tokens_edge_whitespace_yields_empty_tokens() {
        let (tokens, gaps) = split_tokens("  1.2.3.4 a ");
        assert_eq!(tokens, ["", "1.2.3.4", "a", ""]);
        assert_eq!(gaps, ["  ", " ", " "]);
    }

    #[test]
    fn untouched_input_round_trips() {
        let input = "127.0.0.1  localhost\n\n# block\n192.168.0.1\ta  b\n";
        assert_eq!(run(input, |_| {}), input);
    }

    #[test]
    fn whitespace_only_line_round_trips() {
        let input = "127.0.0.1 localhost\n \t \n";
        assert_eq!(run(input, |_| {}), input);
    }

    #[test]
    fn crlf_input_normalizes_to_configured_eol() {
        let out = run("127.0.0.1 a\r\n# c\r\n", |_| {});
        assert_eq!(out, "127.0.0.1 a\n# c\n");

        let mut queue = MutationQueue::new();
        let out = reconcile("127.0.0.1 a\n", &mut queue, LineEnding::CrLf);
        assert_eq!(out, "127.0.0.1 a\r\n");
    }

    #[test]
    fn bare_carriage_return_at_eof_is_content_not_separator() {
        // No \n follows, so the \r is trailing whitespace on the record.
        let input = "1.2.3.4 a\r";
        assert_eq!(run(input, |_| {}), input);

        let out = run("1.2.3.4 a\r\n5.6.7.8 b\r", |_| {});
        assert_eq!(out, "1.2.3.4 a\n5.6.7.8 b\r");
    }

    #[test]
    fn addition_joins_existing_line_with_single_space() {
        let out = run("1.2.3.4  a   b\n", |q| q.add("1.2.3.4", "c"));
        assert_eq!(out, "1.2.3.4  a   b c\n");
    }

    #[test]
    fn addition_already_on_line_is_suppressed() {
        let out = run("1.2.3.4 a b\n", |q| q.add("1.2.3.4", ["b", "c"]));
        assert_eq!(out, "1.2.3.4 a b c\n");
    }

    #[test]
    fn duplicate_names_within_queue_both_append() {
        let out = run("1.2.3.4 a\n", |q| {
            q.add("1.2.3.4", "c");
            q.add("1.2.3.4", "c");
        });
        assert_eq!(out, "1.2.3.4 a c c\n");
    }

    #[test]
    fn addition_consumed_by_first_matching_line() {
        let out = run("1.2.3.4 a\n1.2.3.4 b\n", |q| q.add("1.2.3.4", "x"));
        assert_eq!(out, "1.2.3.4 a x\n1.2.3.4 b\n");
    }

    #[test]
    fn specific_removal_keeps_other_names_and_spacing() {
        let out = run("1.2.3.4 a\t\tb c\n", |q| q.remove("1.2.3.4", "b"));
        // b's own gap goes with it; survivors keep the gaps at their slots.
        assert_eq!(out, "1.2.3.4 a\t\tc\n");
    }

    #[test]
    fn specific_removals_consumed_by_first_matching_line() {
        let out = run("1.2.3.4 a b\n1.2.3.4 a b\n", |q| q.remove("1.2.3.4", "a"));
        assert_eq!(out, "1.2.3.4 b\n1.2.3.4 a b\n");
    }

    #[test]
    fn wildcard_applies_to_every_line_of_that_ip() {
        let out = run("1.2.3.4 a\n8.8.8.8 dns\n1.2.3.4 b\n", |q| {
            q.remove("1.2.3.4", "*")
        });
        assert_eq!(out, "8.8.8.8 dns\n");
    }

    #[test]
    fn removing_every_name_drops_the_line() {
        let out = run("1.2.3.4 a b\n5.6.7.8 keep\n", |q| {
            q.remove("1.2.3.4", ["a", "b"])
        });
        assert_eq!(out, "5.6.7.8 keep\n");
    }

    #[test]
    fn trailing_whitespace_does_not_save_an_emptied_line() {
        let out = run("1.2.3.4 a \n", |q| q.remove("1.2.3.4", "a"));
        assert_eq!(out, "");
    }

    #[test]
    fn global_removal_hits_every_ip_in_one_pass() {
        let out = run("1.2.3.4 x a\n5.6.7.8 x\n9.9.9.9 b x\n", |q| {
            q.remove_host("x")
        });
        assert_eq!(out, "1.2.3.4 a\n9.9.9.9 b\n");
    }

    #[test]
    fn global_removal_set_cleared_after_pass() {
        let mut queue = MutationQueue::new();
        queue.remove_host("x");
        reconcile("1.2.3.4 x y\n", &mut queue, LineEnding::Lf);

        // A later pass with the same queue must not strip a re-added x.
        queue.add("1.2.3.4", "x");
        let out = reconcile("1.2.3.4 y\n", &mut queue, LineEnding::Lf);
        assert_eq!(out, "1.2.3.4 y x\n");
    }

    #[test]
    fn removal_for_absent_ip_is_silently_dropped() {
        let mut queue = MutationQueue::new();
        queue.remove("10.9.9.9", "ghost");
        let out = reconcile("1.2.3.4 a\n", &mut queue, LineEnding::Lf);
        assert_eq!(out, "1.2.3.4 a\n");
        assert!(queue.is_empty());
    }

    #[test]
    fn new_ip_inserted_before_trailing_comment_block() {
        let out = run("127.0.0.1 localhost\n# comment\n", |q| {
            q.add("10.0.0.5", ["a.test"])
        });
        assert_eq!(out, "127.0.0.1 localhost\n10.0.0.5 a.test\n# comment\n");
    }

    #[test]
    fn new_ips_keep_queue_insertion_order() {
        let out = run("1.1.1.1 one\n", |q| {
            q.add("2.2.2.2", "two");
            q.add("3.3.3.3", "three");
        });
        assert_eq!(out, "1.1.1.1 one\n2.2.2.2 two\n3.3.3.3 three\n");
    }

    #[test]
    fn new_ip_into_comment_only_file_lands_after_first_line() {
        let out = run("# a\n# b\n", |q| q.add("1.2.3.4", "x"));
        assert_eq!(out, "# a\n1.2.3.4 x\n# b\n");
    }

    #[test]
    fn new_ip_into_empty_file() {
        let out = run("", |q| q.add("1.2.3.4", "x"));
        assert_eq!(out, "1.2.3.4 x");
    }

    #[test]
    fn new_ip_without_trailing_newline_appends() {
        let out = run("1.1.1.1 one", |q| q.add("2.2.2.2", "two"));
        assert_eq!(out, "1.1.1.1 one\n2.2.2.2 two");
    }

    #[test]
    fn leading_blank_line_discarded_and_insert_at_top() {
        let out = run("\n127.0.0.1 localhost\n", |q| q.add("1.2.3.4", "x"));
        assert_eq!(out, "1.2.3.4 x\n127.0.0.1 localhost\n");
    }

    #[test]
    fn leading_blank_line_untouched_when_nothing_to_insert() {
        let input = "\n127.0.0.1 localhost\n";
        assert_eq!(run(input, |_| {}), input);
        let out = run(input, |q| q.remove("127.0.0.1", "ghost"));
        assert_eq!(out, input);
    }

    #[test]
    fn queued_duplicates_for_new_ip_are_kept_verbatim() {
        let out = run("1.1.1.1 one\n", |q| q.add("2.2.2.2", ["a", "a"]));
        assert_eq!(out, "1.1.1.1 one\n2.2.2.2 a a\n");
    }

    #[test]
    fn ip_only_line_is_dropped_unless_an_addition_revives_it() {
        assert_eq!(run("1.2.3.4\n5.6.7.8 keep\n", |_| {}), "5.6.7.8 keep\n");
        let out = run("1.2.3.4\n5.6.7.8 keep\n", |q| q.add("1.2.3.4", "a"));
        assert_eq!(out, "1.2.3.4 a\n5.6.7.8 keep\n");
    }

    #[test]
    fn indented_record_keeps_its_indent() {
        let input = "  1.2.3.4 a\n";
        assert_eq!(run(input, |_| {}), input);
    }

    #[test]
    fn queue_cleared_even_when_nothing_matched() {
        let mut queue = MutationQueue::new();
        queue.remove("10.0.0.1", "gone");
        queue.remove_host("nothing");
        reconcile("# only comments\n", &mut queue, LineEnding::Lf);
        assert!(queue.is_empty());
    }

    #[test]
    fn reconcile_twice_is_stable() {
        let input = "\n127.0.0.1 localhost\n\n# tail\n";
        let mut queue = MutationQueue::new();
        queue.add("10.0.0.5", "a.test");
        let once = reconcile(input, &mut queue, LineEnding::Lf);
        let twice = reconcile(&once, &mut queue, LineEnding::Lf);
        assert_eq!(once, twice);
    }
}
