//! Structural checks over the token stream
//!
//! The walker resolves import aliases first, so `from os import getenv as g`
//! makes a later `g(...)` read as `os.getenv`. It then visits every name
//! chain (`a.b.c`), attribute access and string literal run and reports the
//! constructs the sandbox policy forbids. A reference counts whether or not
//! it is called: `e = eval` is as much a violation as `eval(x)`.

use super::lexer::{Token, TokenKind};
use super::{InferredEffects, RuleClass, SandboxPolicy, Violation};
use crate::fs_guard::DENIED_NAMES;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Builtins that evaluate or reach code dynamically
const DYNAMIC_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "breakpoint",
    "__builtins__",
    "builtins",
    "importlib",
];

/// Attribute setters/getters that are only allowed with a literal name
const ATTRIBUTE_BUILTINS: &[&str] = &["getattr", "setattr", "delattr"];

/// Qualified names that spawn processes or load code
const DYNAMIC_CALLS: &[&str] = &[
    "os.system",
    "os.popen",
    "os.execl",
    "os.execle",
    "os.execlp",
    "os.execv",
    "os.execve",
    "os.execvp",
    "os.spawnl",
    "os.spawnv",
    "os.fork",
    "os.forkpty",
    "os.kill",
    "sys.modules",
    "sys._getframe",
    "pickle.load",
    "pickle.loads",
    "marshal.loads",
];

/// Modules whose import alone is dynamic execution
const DYNAMIC_MODULES: &[&str] = &[
    "importlib", "builtins", "ctypes", "subprocess", "code", "codeop", "runpy", "pty", "marshal",
    "pickle",
];

const NETWORK_MODULES: &[&str] = &[
    "socket",
    "ssl",
    "urllib",
    "urllib2",
    "http",
    "requests",
    "httpx",
    "aiohttp",
    "ftplib",
    "smtplib",
    "poplib",
    "imaplib",
    "telnetlib",
    "xmlrpc",
    "websocket",
    "websockets",
    "paramiko",
];

const NETWORK_CALLS: &[&str] = &[
    "asyncio.open_connection",
    "asyncio.start_server",
    "asyncio.open_unix_connection",
];

const CREDENTIAL_MODULES: &[&str] = &["keyring", "getpass", "netrc"];

const CREDENTIAL_REFS: &[&str] = &[
    "os.environ",
    "os.environb",
    "os.getenv",
    "os.getenvb",
    "os.putenv",
    "os.unsetenv",
    "posix.environ",
];

/// Calls whose first argument is a filesystem path
const PATH_CALLS: &[&str] = &[
    "open",
    "io.open",
    "os.open",
    "os.remove",
    "os.unlink",
    "os.rename",
    "os.replace",
    "os.mkdir",
    "os.makedirs",
    "os.rmdir",
    "os.removedirs",
    "os.listdir",
    "os.scandir",
    "os.walk",
    "os.chmod",
    "os.chown",
    "os.stat",
    "os.truncate",
    "os.symlink",
    "os.link",
    "pathlib.Path",
    "pathlib.PurePath",
    "pathlib.PosixPath",
    "pathlib.WindowsPath",
    "shutil.copy",
    "shutil.copy2",
    "shutil.copyfile",
    "shutil.copytree",
    "shutil.move",
    "shutil.rmtree",
    "glob.glob",
    "glob.iglob",
];

/// Path calls that change the filesystem
const WRITE_CALLS: &[&str] = &[
    "os.remove",
    "os.unlink",
    "os.rename",
    "os.replace",
    "os.mkdir",
    "os.makedirs",
    "os.rmdir",
    "os.removedirs",
    "os.chmod",
    "os.chown",
    "os.truncate",
    "os.symlink",
    "os.link",
    "shutil.copy",
    "shutil.copy2",
    "shutil.copyfile",
    "shutil.copytree",
    "shutil.move",
    "shutil.rmtree",
];

/// Dunder names with no introspection reach
const SAFE_DUNDERS: &[&str] = &[
    "__init__",
    "__name__",
    "__doc__",
    "__len__",
    "__str__",
    "__repr__",
    "__iter__",
    "__next__",
    "__enter__",
    "__exit__",
    "__eq__",
    "__hash__",
    "__lt__",
    "__contains__",
    "__getitem__",
    "__post_init__",
];

/// Frame and code object attributes
const FRAME_ATTRIBUTES: &[&str] = &[
    "f_globals",
    "f_locals",
    "f_back",
    "f_builtins",
    "gi_frame",
    "cr_frame",
    "tb_frame",
    "co_code",
    "func_globals",
];

/// Attribute names that reach an interpreter escape hatch from any object,
/// e.g. a module that re-exports `builtins` or `sys`
const REACH_ATTRIBUTES: &[&str] = &[
    "builtins",
    "sys",
    "os",
    "importlib",
    "subprocess",
    "ctypes",
    "runpy",
    "pty",
    "marshal",
    "pickle",
    "codeop",
    "eval",
    "exec",
    "__import__",
    "globals",
    "locals",
    "vars",
    "breakpoint",
];

/// Library entry points that evaluate strings (annotations) as code
const EVAL_BACKED_CALLS: &[&str] = &[
    "typing.get_type_hints",
    "typing.ForwardRef",
    "typing._eval_type",
    "typing.evaluate_forward_ref",
    "functools.singledispatch",
    "functools.singledispatchmethod",
];

const SANDBOX_PATH: &str = "host.sandbox_path";
const HOST_INVOKE: &str = "host.invoke";

pub(crate) fn analyze(tokens: &[Token], policy: &SandboxPolicy) -> (Vec<Violation>, InferredEffects) {
    let mut walker = Walker {
        tokens,
        policy,
        aliases: HashMap::new(),
        violations: Vec::new(),
        effects: InferredEffects::default(),
    };
    walker.scan_imports();
    walker.scan_references();
    walker.scan_literals();
    (walker.violations, walker.effects)
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// `qualified` is `entry` or a member of it
fn matches_entry(qualified: &str, entry: &str) -> bool {
    qualified == entry
        || (qualified.len() > entry.len()
            && qualified.starts_with(entry)
            && qualified.as_bytes()[entry.len()] == b'.')
}

fn find_entry<'t>(qualified: &str, table: &[&'t str]) -> Option<&'t str> {
    table
        .iter()
        .copied()
        .find(|entry| matches_entry(qualified, entry))
}

struct Walker<'a> {
    tokens: &'a [Token],
    policy: &'a SandboxPolicy,
    /// local name -> qualified origin
    aliases: HashMap<String, String>,
    violations: Vec<Violation>,
    effects: InferredEffects,
}

impl<'a> Walker<'a> {
    fn flag(&mut self, rule: RuleClass, construct: impl Into<String>, line: usize) {
        self.violations.push(Violation {
            line,
            rule,
            construct: construct.into(),
        });
    }

    fn token(&self, index: usize) -> Option<&'a Token> {
        self.tokens.get(index)
    }

    fn is_op_at(&self, index: usize, op: &str) -> bool {
        self.token(index).is_some_and(|t| t.is_op(op))
    }

    fn name_at(&self, index: usize) -> Option<&'a str> {
        self.token(index).and_then(|t| t.name())
    }

    fn ends_statement(&self, index: usize) -> bool {
        match self.token(index) {
            None => true,
            Some(t) => t.kind == TokenKind::Newline || t.is_op(";"),
        }
    }

    // ---- imports --------------------------------------------------------

    fn scan_imports(&mut self) {
        let mut i = 0;
        while i < self.tokens.len() {
            if self.tokens[i].is_name("from") {
                if let Some(next) = self.parse_from_import(i) {
                    i = next;
                    continue;
                }
            } else if self.tokens[i].is_name("import") {
                i = self.parse_import(i);
                continue;
            }
            i += 1;
        }
    }

    /// Read `a.b.c` starting at `index`; returns the parts and the index after
    fn read_dotted(&self, mut index: usize) -> (Vec<&'a str>, usize) {
        let mut parts = Vec::new();
        if let Some(first) = self.name_at(index) {
            parts.push(first);
            index += 1;
            while self.is_op_at(index, ".") {
                match self.name_at(index + 1) {
                    Some(part) => {
                        parts.push(part);
                        index += 2;
                    }
                    None => break,
                }
            }
        }
        (parts, index)
    }

    /// `import a.b as c, d`
    fn parse_import(&mut self, start: usize) -> usize {
        let line = self.tokens[start].line;
        let mut j = start + 1;
        loop {
            let (parts, next) = self.read_dotted(j);
            if parts.is_empty() {
                return next.max(j + 1);
            }
            j = next;
            let module = parts.join(".");
            self.check_module(&module, line);

            if self.name_at(j) == Some("as") {
                if let Some(alias) = self.name_at(j + 1) {
                    self.aliases.insert(alias.to_string(), module.clone());
                }
                j += 2;
            } else {
                self.aliases
                    .insert(parts[0].to_string(), parts[0].to_string());
            }

            if self.is_op_at(j, ",") {
                j += 1;
            } else {
                return j;
            }
        }
    }

    /// `from [.]a.b import (c as d, e)`; `None` when `from` belongs to
    /// `raise ... from` or `yield from`
    fn parse_from_import(&mut self, start: usize) -> Option<usize> {
        let line = self.tokens[start].line;
        let mut j = start + 1;

        let mut relative = false;
        while self.is_op_at(j, ".") || self.is_op_at(j, "...") {
            relative = true;
            j += 1;
        }

        let (parts, next) = self.read_dotted(j);
        j = next;
        if self.name_at(j) != Some("import") {
            return None;
        }
        j += 1;

        let module = parts.join(".");
        if relative {
            self.flag(RuleClass::DisallowedImport, "relative import", line);
        } else if !module.is_empty() {
            self.check_module(&module, line);
        }

        if self.is_op_at(j, "(") {
            j += 1;
        }
        while !self.ends_statement(j) {
            if self.is_op_at(j, "*") {
                self.flag(RuleClass::DisallowedImport, format!("from {} import *", module), line);
                j += 1;
                continue;
            }
            if let Some(name) = self.name_at(j) {
                let mut local = name;
                if self.name_at(j + 1) == Some("as") {
                    if let Some(alias) = self.name_at(j + 2) {
                        local = alias;
                    }
                    j += 2;
                }
                self.aliases
                    .insert(local.to_string(), format!("{}.{}", module, name));
            }
            j += 1;
        }
        Some(j)
    }

    fn check_module(&mut self, module: &str, line: usize) {
        let top = module.split('.').next().unwrap_or(module);
        let construct = format!("import {}", module);

        if DYNAMIC_MODULES.contains(&top) {
            self.flag(RuleClass::DynamicExecution, construct, line);
        } else if NETWORK_MODULES.contains(&top) {
            self.flag(RuleClass::UnroutedNetwork, construct, line);
        } else if CREDENTIAL_MODULES.contains(&top) {
            self.flag(RuleClass::CredentialAccess, construct, line);
        } else if !self.policy.allowed_modules.contains(top) {
            self.flag(RuleClass::DisallowedImport, construct, line);
        }
    }

    // ---- references -----------------------------------------------------

    fn resolve(&self, parts: &[&str]) -> String {
        let head = self
            .aliases
            .get(parts[0])
            .cloned()
            .unwrap_or_else(|| parts[0].to_string());
        let mut qualified = head;
        for part in &parts[1..] {
            qualified.push('.');
            qualified.push_str(part);
        }
        qualified
    }

    fn scan_references(&mut self) {
        let tokens = self.tokens;
        for i in 0..tokens.len() {
            let token = &tokens[i];

            if token.is_op(".") {
                if let Some(attr) = self.name_at(i + 1) {
                    if (is_dunder(attr) && !SAFE_DUNDERS.contains(&attr))
                        || FRAME_ATTRIBUTES.contains(&attr)
                        || REACH_ATTRIBUTES.contains(&attr)
                    {
                        self.flag(
                            RuleClass::DynamicExecution,
                            format!("attribute .{}", attr),
                            token.line,
                        );
                    }
                }
                continue;
            }

            let Some(name) = token.name() else {
                continue;
            };
            // Attribute names are part of the chain that owns them
            if i > 0 && tokens[i - 1].is_op(".") {
                continue;
            }
            if i > 0 && (tokens[i - 1].is_name("def") || tokens[i - 1].is_name("class")) {
                continue;
            }
            if matches!(name, "import" | "from" | "as") {
                continue;
            }

            let (parts, end) = self.read_dotted(i);
            let qualified = self.resolve(&parts);
            let is_call = self.is_op_at(end, "(");
            if self.aliases.contains_key(parts[0]) {
                self.check_module_members(&qualified, token.line);
            }
            self.check_reference(name, &qualified, is_call, end, token.line);
        }
    }

    /// Members of an imported module that are escape hatches or forbidden
    /// modules themselves, e.g. `typing.sys` or `dataclasses.builtins`
    fn check_module_members(&mut self, qualified: &str, line: usize) {
        let segments: Vec<&str> = qualified.split('.').collect();
        for (index, segment) in segments.iter().enumerate().skip(1) {
            let rule = if REACH_ATTRIBUTES.contains(segment) || DYNAMIC_MODULES.contains(segment) {
                RuleClass::DynamicExecution
            } else if NETWORK_MODULES.contains(segment) {
                RuleClass::UnroutedNetwork
            } else if CREDENTIAL_MODULES.contains(segment) {
                RuleClass::CredentialAccess
            } else {
                continue;
            };
            self.flag(rule, segments[..=index].join("."), line);
        }
    }

    fn check_reference(&mut self, raw: &str, qualified: &str, is_call: bool, end: usize, line: usize) {
        let unprefixed = qualified.strip_prefix("builtins.").unwrap_or(qualified);
        let base = unprefixed.split('.').next().unwrap_or(unprefixed);

        if DYNAMIC_BUILTINS.contains(&base) {
            self.flag(RuleClass::DynamicExecution, base, line);
        } else if is_dunder(raw) && !SAFE_DUNDERS.contains(&raw) {
            self.flag(RuleClass::DynamicExecution, format!("name {}", raw), line);
        }

        if self.policy.forbidden_calls.contains(unprefixed)
            || self.policy.forbidden_calls.contains(base)
        {
            self.flag(RuleClass::DynamicExecution, unprefixed, line);
        }

        if ATTRIBUTE_BUILTINS.contains(&unprefixed) {
            self.check_attribute_builtin(unprefixed, is_call, end, line);
        }

        if let Some(entry) = find_entry(qualified, DYNAMIC_CALLS) {
            self.flag(RuleClass::DynamicExecution, entry, line);
        }

        if let Some(entry) = find_entry(qualified, EVAL_BACKED_CALLS) {
            self.flag(RuleClass::DynamicExecution, entry, line);
        }

        if let Some(entry) = find_entry(qualified, CREDENTIAL_REFS) {
            self.flag(RuleClass::CredentialAccess, entry, line);
        }

        if let Some(entry) = find_entry(qualified, NETWORK_CALLS) {
            self.flag(RuleClass::UnroutedNetwork, entry, line);
        }

        if let Some(entry) = PATH_CALLS.iter().copied().find(|e| *e == unprefixed) {
            self.check_path_call(entry, is_call, end, line);
        }

        if qualified == HOST_INVOKE {
            self.check_host_invoke(is_call, end, line);
        }
    }

    /// `host.invoke` must name its target with a literal so the unit's
    /// reach is known before it runs
    fn check_host_invoke(&mut self, is_call: bool, open: usize, line: usize) {
        self.effects.invokes_host = true;
        if !is_call {
            if !self.in_import_statement(open) {
                self.flag(
                    RuleClass::DynamicExecution,
                    format!("{} referenced by value", HOST_INVOKE),
                    line,
                );
            }
            return;
        }

        let args = self.call_args(open);
        let target = args.first().and_then(|&(start, end)| {
            let start = self.skip_keyword(start, end);
            self.literal_in(start, end)
        });
        match target {
            Some(name) if !name.trim().is_empty() => {
                self.effects.invoke_targets.insert(name.trim().to_string());
            }
            _ => self.flag(
                RuleClass::DynamicExecution,
                format!("{} with computed target", HOST_INVOKE),
                line,
            ),
        }
    }

    /// Whether the logical line holding `index` is an import
    fn in_import_statement(&self, index: usize) -> bool {
        let upto = index.min(self.tokens.len());
        let start = self.tokens[..upto]
            .iter()
            .rposition(|t| t.kind == TokenKind::Newline || t.is_op(";"))
            .map_or(0, |p| p + 1);
        self.token(start)
            .is_some_and(|t| t.is_name("from") || t.is_name("import"))
    }

    fn check_attribute_builtin(&mut self, name: &str, is_call: bool, open: usize, line: usize) {
        if !is_call {
            self.flag(
                RuleClass::DynamicExecution,
                format!("{} referenced by value", name),
                line,
            );
            return;
        }

        let args = self.call_args(open);
        let literal = args.get(1).and_then(|&(s, e)| self.literal_in(s, e));
        match literal {
            None => self.flag(
                RuleClass::DynamicExecution,
                format!("{} with computed attribute", name),
                line,
            ),
            Some(attr) => {
                if is_dunder(&attr)
                    || DYNAMIC_BUILTINS.contains(&attr.as_str())
                    || FRAME_ATTRIBUTES.contains(&attr.as_str())
                    || CREDENTIAL_REFS.iter().any(|r| r.ends_with(&format!(".{}", attr)))
                {
                    self.flag(
                        RuleClass::DynamicExecution,
                        format!("{}(..., '{}')", name, attr),
                        line,
                    );
                }
                if attr == "invoke" {
                    self.effects.invokes_host = true;
                    self.flag(
                        RuleClass::DynamicExecution,
                        format!("{}(..., 'invoke')", name),
                        line,
                    );
                }
            }
        }
    }

    fn check_path_call(&mut self, entry: &str, is_call: bool, open: usize, line: usize) {
        if !is_call {
            self.flag(
                RuleClass::FilesystemEscape,
                format!("{} referenced by value", entry),
                line,
            );
            return;
        }

        if WRITE_CALLS.contains(&entry) {
            self.effects.writes_files = true;
        }

        let args = self.call_args(open);
        if entry == "open" || entry == "io.open" {
            if self.open_mode_writes(&args) {
                self.effects.writes_files = true;
            }
        }

        let Some(&(start, end)) = args.first() else {
            self.flag(
                RuleClass::FilesystemEscape,
                format!("{}() without a path", entry),
                line,
            );
            return;
        };
        let start = self.skip_keyword(start, end);

        if let Some(literal) = self.literal_in(start, end) {
            if !path_inside_root(&literal, &self.policy.sandbox_root) {
                self.flag(
                    RuleClass::FilesystemEscape,
                    format!("{}('{}')", entry, literal),
                    line,
                );
            }
            return;
        }

        if !self.is_sandbox_path_call(start, end) {
            self.flag(
                RuleClass::FilesystemEscape,
                format!("{}(<computed path>)", entry),
                line,
            );
        }
    }

    /// Whether tokens `[start, end)` are exactly `host.sandbox_path(...)`
    fn is_sandbox_path_call(&self, start: usize, end: usize) -> bool {
        let (parts, next) = self.read_dotted(start);
        if parts.is_empty() || self.resolve(&parts) != SANDBOX_PATH || !self.is_op_at(next, "(") {
            return false;
        }
        self.matching_close(next) == Some(end.saturating_sub(1))
    }

    fn open_mode_writes(&self, args: &[(usize, usize)]) -> bool {
        let writes = |mode: &str| mode.chars().any(|c| matches!(c, 'w' | 'a' | 'x' | '+'));

        for (position, &(start, end)) in args.iter().enumerate() {
            if self.name_at(start) == Some("mode") && self.is_op_at(start + 1, "=") {
                return self.literal_in(start + 2, end).is_some_and(|m| writes(&m));
            }
            if position == 1 {
                return match self.literal_in(start, end) {
                    Some(mode) => writes(&mode),
                    // Unknown mode: assume it may write
                    None => true,
                };
            }
        }
        false
    }

    /// Skip a leading `name=` in a call argument
    fn skip_keyword(&self, start: usize, end: usize) -> usize {
        if start + 1 < end && self.name_at(start).is_some() && self.is_op_at(start + 1, "=") {
            start + 2
        } else {
            start
        }
    }

    /// Index of the bracket closing the one at `open`
    fn matching_close(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (offset, token) in self.tokens[open..].iter().enumerate() {
            match token.kind {
                TokenKind::Op("(") | TokenKind::Op("[") | TokenKind::Op("{") => depth += 1,
                TokenKind::Op(")") | TokenKind::Op("]") | TokenKind::Op("}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(open + offset);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Top-level argument ranges `[start, end)` of the call opened at `open`
    fn call_args(&self, open: usize) -> Vec<(usize, usize)> {
        let Some(close) = self.matching_close(open) else {
            return Vec::new();
        };

        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut start = open + 1;
        for index in open + 1..close {
            match self.tokens[index].kind {
                TokenKind::Op("(") | TokenKind::Op("[") | TokenKind::Op("{") => depth += 1,
                TokenKind::Op(")") | TokenKind::Op("]") | TokenKind::Op("}") => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Op(",") if depth == 0 => {
                    if index > start {
                        args.push((start, index));
                    }
                    start = index + 1;
                }
                _ => {}
            }
        }
        if close > start {
            args.push((start, close));
        }
        args
    }

    /// Fold `[start, end)` into one string when it is only literals joined
    /// by juxtaposition or `+`
    fn literal_in(&self, start: usize, end: usize) -> Option<String> {
        if start >= end {
            return None;
        }
        let mut folded = String::new();
        let mut expect_literal = true;
        for token in &self.tokens[start..end] {
            match &token.kind {
                TokenKind::Str(s) => {
                    folded.push_str(s);
                    expect_literal = false;
                }
                TokenKind::Op("+") if !expect_literal => expect_literal = true,
                _ => return None,
            }
        }
        (!expect_literal).then_some(folded)
    }

    // ---- literals -------------------------------------------------------

    fn scan_literals(&mut self) {
        let mut i = 0;
        while i < self.tokens.len() {
            if !matches!(self.tokens[i].kind, TokenKind::Str(_)) {
                i += 1;
                continue;
            }

            // Longest literal run starting here
            let line = self.tokens[i].line;
            let mut end = i + 1;
            loop {
                match self.token(end).map(|t| &t.kind) {
                    Some(TokenKind::Str(_)) => end += 1,
                    Some(TokenKind::Op("+"))
                        if matches!(
                            self.token(end + 1).map(|t| &t.kind),
                            Some(TokenKind::Str(_))
                        ) =>
                    {
                        end += 2
                    }
                    _ => break,
                }
            }

            let mut candidates: Vec<String> = self.tokens[i..end]
                .iter()
                .filter_map(|t| match &t.kind {
                    TokenKind::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
            if let Some(folded) = self.literal_in(i, end) {
                candidates.push(folded);
            }

            if let Some(hit) = candidates.iter().find_map(|c| names_credential(c)) {
                self.flag(RuleClass::CredentialAccess, format!("literal naming {}", hit), line);
            }
            i = end;
        }
    }
}

/// The denied name a literal refers to, if any
fn names_credential(literal: &str) -> Option<String> {
    let lower = literal.to_ascii_lowercase();

    for denied in DENIED_NAMES {
        if denied.contains('/') && lower.contains(denied) {
            return Some(denied.to_string());
        }
    }

    for component in lower.split(|c| c == '/' || c == '\\') {
        for denied in DENIED_NAMES.iter().filter(|d| !d.contains('/')) {
            if component == *denied || (denied.starts_with("id_") && component.starts_with(denied))
            {
                return Some(denied.to_string());
            }
        }
        let secret_file = ["token", "credential", "secret"]
            .iter()
            .any(|word| component.contains(word));
        if secret_file && component.contains('.') {
            return Some(component.to_string());
        }
    }
    None
}

/// Lexical containment: no symlink resolution, `..` may not climb out
pub(crate) fn path_inside_root(literal: &str, root: &Path) -> bool {
    if literal.starts_with('~') || literal.is_empty() {
        return false;
    }

    let path = Path::new(literal);
    if path.is_absolute() {
        match normalize(path) {
            Some(normalized) => normalize(root).is_some_and(|r| normalized.starts_with(r)),
            None => false,
        }
    } else {
        normalize(path).is_some()
    }
}

/// Resolve `.` and `..` lexically; `None` if `..` climbs above the start
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    Some(out)
}
