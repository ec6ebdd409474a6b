//! include / exclude 过滤规则
//!
//! 与 `aws s3 sync` 一致：默认全部包含，规则按顺序求值，后面的规则优先。
//! 不含 `/` 的模式只匹配文件名，含 `/` 的模式匹配完整相对路径。

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    pattern: String,
    regex: Regex,
    full_path: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    rules: Vec<Rule>,
}

impl SyncFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.push(RuleKind::Include, pattern);
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.push(RuleKind::Exclude, pattern);
        self
    }

    fn push(&mut self, kind: RuleKind, pattern: &str) {
        self.rules.push(Rule {
            kind,
            pattern: pattern.to_string(),
            regex: glob_to_regex(pattern),
            full_path: pattern.contains('/'),
        });
    }

    /// `relative` 为相对同步源目录、以 `/` 分隔的路径
    pub fn is_included(&self, relative: &str) -> bool {
        let relative = relative.replace('\\', "/");
        let name = relative.rsplit('/').next().unwrap_or(&relative);

        let mut included = true;
        for rule in &self.rules {
            let target = if rule.full_path { relative.as_str() } else { name };
            if rule.regex.is_match(target) {
                included = rule.kind == RuleKind::Include;
            }
        }
        included
    }

    pub fn patterns(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|r| match r.kind {
                RuleKind::Include => format!("+{}", r.pattern),
                RuleKind::Exclude => format!("-{}", r.pattern),
            })
            .collect()
    }
}

/// 简单的 glob → 正则：`*` / `**` 匹配任意字符，`?` 匹配单个字符
fn glob_to_regex(pattern: &str) -> Regex {
    let mut re = String::from("^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                re.push_str(&regex::escape(&literal));
                literal.clear();
                if c == '*' {
                    if !re.ends_with(".*") {
                        re.push_str(".*");
                    }
                } else {
                    re.push('.');
                }
            }
            _ => literal.push(c),
        }
    }
    re.push_str(&regex::escape(&literal));
    re.push('$');

    // 转义后的模式一定合法
    Regex::new(&re).unwrap_or_else(|_| Regex::new("^$").expect("empty regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_only_filter() {
        let filter = SyncFilter::new().exclude("*").include("*_metadata.csv");
        assert!(filter.is_included("StudyA/StudyA_metadata.csv"));
        assert!(!filter.is_included("StudyA/raw/A01/surveys/a.csv"));
        assert!(!filter.is_included("StudyA/StudyA_metadataXcsv"));
    }

    #[test]
    fn test_later_rules_win() {
        let filter = SyncFilter::new()
            .exclude("*")
            .include("*_metadata.csv")
            .include("*Run_sheet*.csv")
            .exclude("*.mp3");
        assert!(filter.is_included("A01/A01.Run_sheet_eeg.csv"));
        assert!(!filter.is_included("A01/audio.mp3"));
        assert_eq!(filter.patterns().len(), 4);
    }

    #[test]
    fn test_sidecar_exclusion() {
        let filter = SyncFilter::new().exclude("*.mp3").exclude(".check_sum*");
        assert!(filter.is_included("raw/A01/phone/data.json"));
        assert!(!filter.is_included("raw/A01/phone/.check_sum_data.json"));
        assert!(!filter.is_included("interview.mp3"));
    }

    #[test]
    fn test_full_path_pattern() {
        let filter = SyncFilter::new().exclude("raw/**");
        assert!(!filter.is_included("raw/A01/x.csv"));
        assert!(filter.is_included("processed/A01/x.csv"));
    }
}
