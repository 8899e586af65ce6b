use crate::error::{Result, SineError};
use regex::Regex;
use std::sync::OnceLock;

pub const RAW_HOST: &str = "https://raw.githubusercontent.com";
pub const API_HOST: &str = "https://api.github.com/repos";
pub const DEFAULT_BRANCH: &str = "main";

/// A parsed `owner/repo[/tree/branch/path...]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: Vec<String>,
}

impl RepoRef {
    /// Accepts `owner/repo`, `owner/repo/tree/branch/sub/dir`, a full
    /// `https://github.com/...` URL, or any of those wrapped as a markdown
    /// link (`[label](url)`).
    pub fn parse(input: &str) -> Result<Self> {
        let unwrapped = strip_markdown_link(input.trim());
        let stripped = strip_github_prefix(unwrapped);

        let (repo_part, tree_part) = match stripped.split_once("/tree/") {
            Some((repo_part, tree_part)) => (repo_part, Some(tree_part)),
            None => (stripped, None),
        };

        let segments: Vec<&str> = repo_part.split('/').filter(|s| !s.is_empty()).collect();
        let [owner, repo] = segments.as_slice() else {
            return Err(SineError::InvalidRepo(input.to_string()));
        };
        if !valid_segment(owner) || !valid_segment(repo) {
            return Err(SineError::InvalidRepo(input.to_string()));
        }

        let (branch, path) = match tree_part {
            Some(tree_part) => {
                let mut parts = tree_part.split('/').filter(|s| !s.is_empty());
                let branch = parts
                    .next()
                    .ok_or_else(|| SineError::InvalidRepo(input.to_string()))?;
                (branch.to_string(), parts.map(str::to_string).collect())
            }
            None => (DEFAULT_BRANCH.to_string(), Vec::new()),
        };

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            path,
        })
    }

    /// Raw-content base URL; always ends in `/`.
    pub fn raw_base_url(&self) -> String {
        let mut url = format!("{RAW_HOST}/{}/{}/{}/", self.owner, self.repo, self.branch);
        for segment in &self.path {
            url.push_str(segment);
            url.push('/');
        }
        url
    }

    pub fn api_url(&self) -> String {
        format!("{API_HOST}/{}/{}", self.owner, self.repo)
    }

    pub fn releases_url(&self) -> String {
        format!("{}/releases/latest", self.api_url())
    }

    /// GitHub contents listing for a directory inside this reference.
    pub fn contents_url(&self, dir: &str) -> String {
        let mut path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        path.push(dir);
        format!(
            "{}/contents/{}?ref={}",
            self.api_url(),
            path.join("/"),
            self.branch
        )
    }

    /// True when the reference points below the default branch root.
    pub fn is_subtree(&self) -> bool {
        self.branch != DEFAULT_BRANCH || !self.path.is_empty()
    }

    /// Browsable URL that parses back into this reference.
    pub fn html_url(&self) -> String {
        let mut url = format!("https://github.com/{}/{}", self.owner, self.repo);
        if self.is_subtree() {
            url.push_str("/tree/");
            url.push_str(&self.branch);
            for segment in &self.path {
                url.push('/');
                url.push_str(segment);
            }
        }
        url
    }
}

pub fn raw_base_url(input: &str) -> Result<String> {
    Ok(RepoRef::parse(input)?.raw_base_url())
}

fn markdown_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[[^\]]*\]\((.*)\)$").expect("valid markdown link regex"))
}

fn strip_markdown_link(input: &str) -> &str {
    markdown_link_regex()
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(input)
}

fn strip_github_prefix(input: &str) -> &str {
    let without_scheme = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    without_scheme
        .strip_prefix("www.github.com/")
        .or_else(|| without_scheme.strip_prefix("github.com/"))
        .unwrap_or(without_scheme)
        .trim_end_matches('/')
}

fn valid_segment(segment: &str) -> bool {
    segment
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}
