//! Response post-processing pipeline, applied uniformly across every
//! provider. `clean` must be idempotent: `clean(clean(x)) == clean(x)`.

const THINK_CLOSE: &str = "</think>";
const CHAT_SENTINEL: &str = "<|im_end|>";

/// `<|tool_call_begin|>...<|tool_call_end|>` and its Unicode-delimiter variants observed
/// in the wild (some providers emit fullwidth-bar delimiters instead of pipes).
const TOOL_CALL_DELIMITERS: &[(&str, &str)] = &[
    ("<|tool_call_begin|>", "<|tool_call_end|>"),
    ("<|tool_calls_begin|>", "<|tool_calls_end|>"),
    ("<｜tool▁call▁begin｜>", "<｜tool▁call▁end｜>"),
    ("<｜tool▁calls▁begin｜>", "<｜tool▁calls▁end｜>"),
];

pub fn clean(raw: &str) -> String {
    let mut s = strip_think_preamble(raw);
    s = truncate_at_sentinel(&s);
    s = strip_tool_call_pairs(&s);
    s.trim().to_string()
}

fn strip_think_preamble(s: &str) -> String {
    match s.find(THINK_CLOSE) {
        Some(idx) => s[idx + THINK_CLOSE.len()..].to_string(),
        None => s.to_string(),
    }
}

fn truncate_at_sentinel(s: &str) -> String {
    match s.find(CHAT_SENTINEL) {
        Some(idx) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn strip_tool_call_pairs(s: &str) -> String {
    let mut out = s.to_string();
    loop {
        let mut changed = false;
        for (begin, end) in TOOL_CALL_DELIMITERS {
            while let Some(start) = out.find(begin) {
                match out[start..].find(end) {
                    Some(rel_end) => {
                        let stop = start + rel_end + end.len();
                        out.replace_range(start..stop, "");
                    }
                    None => out.truncate(start),
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_preamble() {
        assert_eq!(clean("reasoning...</think>the answer"), "the answer");
    }

    #[test]
    fn truncates_at_chat_sentinel() {
        assert_eq!(clean("answer<|im_end|>trailing junk"), "answer");
    }

    #[test]
    fn removes_all_tool_call_variants() {
        let input = "before<|tool_call_begin|>ignored<|tool_call_end|>middle<｜tool▁call▁begin｜>x<｜tool▁call▁end｜>after";
        assert_eq!(clean(input), "beforemiddleafter");
    }

    #[test]
    fn unterminated_tool_call_truncates_rather_than_loops() {
        assert_eq!(clean("kept<|tool_call_begin|>dangling, no close"), "kept");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(clean("   padded   "), "padded");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "reasoning</think>  answer<|im_end|>junk",
            "plain text, no markers",
            "<|tool_call_begin|>a<|tool_call_end|><|tool_call_begin|>b<|tool_call_end|>result",
        ];
        for s in samples {
            let once = clean(s);
            let twice = clean(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }
}
