//! Purpose: Recover import specifiers and export names from transformed module text.
//! Exports: `ModuleSyntax`, `scan_module`.
//! Role: Lightweight tokenizer feeding the module graph; not a parser and not a validator.
//! Invariants: Only top-level static imports/exports are recorded; `import("x")` is found at any depth.
//! Invariants: Re-export sources count as static imports, in first-appearance order.
use std::collections::BTreeMap;

use crate::plugin::types::{LOCAL_EXPORTS, STAR_REEXPORT};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleSyntax {
    pub imports: Vec<String>,
    pub dynamic_imports: Vec<String>,
    /// Export names keyed by source; `"."` holds local declarations and `"*"` marks `export *`.
    pub exported_bindings: BTreeMap<String, Vec<String>>,
}

impl ModuleSyntax {
    fn add_import(&mut self, source: &str) {
        if !self.imports.iter().any(|existing| existing == source) {
            self.imports.push(source.to_string());
        }
    }

    fn add_dynamic_import(&mut self, source: &str) {
        if !self.dynamic_imports.iter().any(|existing| existing == source) {
            self.dynamic_imports.push(source.to_string());
        }
    }

    fn add_export(&mut self, source: &str, name: &str) {
        let names = self.exported_bindings.entry(source.to_string()).or_default();
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }

    pub fn has_default_export(&self) -> bool {
        self.exported_bindings
            .values()
            .any(|names| names.iter().any(|name| name == "default"))
    }
}

pub fn scan_module(source: &str) -> ModuleSyntax {
    let tokens = Tokenizer::new(source).run();
    let mut scanner = Scanner {
        tokens,
        pos: 0,
        depth: 0,
        syntax: ModuleSyntax::default(),
    };
    scanner.run();
    scanner.syntax
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Punct(char),
    Template,
    Regex,
}

impl Token {
    fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Word(w) if w == word)
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

const REGEX_AFTER_WORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
}

impl Tokenizer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek(0) {
            match c {
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment(),
                '/' if self.regex_allowed() => {
                    self.skip_regex();
                    self.tokens.push(Token::Regex);
                }
                '"' | '\'' => {
                    let value = self.read_string(c);
                    self.tokens.push(Token::Str(value));
                }
                '`' => {
                    self.skip_template();
                    self.tokens.push(Token::Template);
                }
                c if is_word_char(c) => {
                    let start = self.pos;
                    while self.peek(0).is_some_and(is_word_char) {
                        self.pos += 1;
                    }
                    let word: String = self.chars[start..self.pos].iter().collect();
                    self.tokens.push(Token::Word(word));
                }
                c => {
                    self.pos += 1;
                    self.tokens.push(Token::Punct(c));
                }
            }
        }
        self.tokens
    }

    fn regex_allowed(&self) -> bool {
        match self.tokens.last() {
            None => true,
            Some(Token::Punct(c)) => !matches!(c, ')' | ']' | '}'),
            Some(Token::Word(word)) => REGEX_AFTER_WORDS.contains(&word.as_str()),
            Some(_) => false,
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.pos < self.chars.len() {
            if self.peek(0) == Some('*') && self.peek(1) == Some('/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                '\\' => self.pos += 1,
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => break,
                '\n' => break,
                _ => {}
            }
        }
        while self.peek(0).is_some_and(is_word_char) {
            self.pos += 1;
        }
    }

    // Reads a quoted literal starting at the opening quote and returns its cooked value.
    fn read_string(&mut self, quote: char) -> String {
        self.pos += 1;
        let mut value = String::new();
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\n' => break,
                '\\' => self.read_escape(&mut value),
                c => value.push(c),
            }
        }
        value
    }

    fn read_escape(&mut self, value: &mut String) {
        let Some(c) = self.peek(0) else {
            return;
        };
        self.pos += 1;
        match c {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            'b' => value.push('\u{8}'),
            'f' => value.push('\u{c}'),
            'v' => value.push('\u{b}'),
            '0' if !self.peek(0).is_some_and(|d| d.is_ascii_digit()) => value.push('\0'),
            'x' => {
                if let Some(decoded) = self.read_hex(2) {
                    value.push(decoded);
                }
            }
            'u' if self.peek(0) == Some('{') => {
                let start = self.pos + 1;
                let mut end = start;
                while self.chars.get(end).is_some_and(|d| d.is_ascii_hexdigit()) {
                    end += 1;
                }
                if self.chars.get(end) == Some(&'}') {
                    let digits: String = self.chars[start..end].iter().collect();
                    if let Some(decoded) = u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                        value.push(decoded);
                    }
                    self.pos = end + 1;
                }
            }
            'u' => {
                if let Some(decoded) = self.read_hex(4) {
                    value.push(decoded);
                }
            }
            '\r' => {
                if self.peek(0) == Some('\n') {
                    self.pos += 1;
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => value.push(other),
        }
    }

    fn read_hex(&mut self, len: usize) -> Option<char> {
        let end = self.pos + len;
        let digits: String = self.chars.get(self.pos..end)?.iter().collect();
        let code = u32::from_str_radix(&digits, 16).ok()?;
        self.pos = end;
        char::from_u32(code)
    }

    fn skip_template(&mut self) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                '\\' => self.pos += 1,
                '`' => return,
                '$' if self.peek(0) == Some('{') => {
                    self.pos += 1;
                    self.skip_template_expression();
                }
                _ => {}
            }
        }
    }

    fn skip_template_expression(&mut self) {
        let mut depth = 1usize;
        while let Some(c) = self.peek(0) {
            match c {
                '"' | '\'' => {
                    self.read_string(c);
                }
                '`' => self.skip_template(),
                '{' => {
                    depth += 1;
                    self.pos += 1;
                }
                '}' => {
                    self.pos += 1;
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }
}

struct Scanner {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    syntax: ModuleSyntax,
}

impl Scanner {
    fn token(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    fn str_at(&self, index: usize) -> Option<String> {
        match self.token(index) {
            Some(Token::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn name_at(&self, index: usize) -> Option<String> {
        match self.token(index) {
            Some(Token::Word(value)) | Some(Token::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn run(&mut self) {
        while let Some(token) = self.token(self.pos) {
            match token {
                Token::Punct('{' | '(' | '[') => {
                    self.depth += 1;
                    self.pos += 1;
                }
                Token::Punct('}' | ')' | ']') => {
                    self.depth = self.depth.saturating_sub(1);
                    self.pos += 1;
                }
                Token::Word(word) if word == "import" && !self.after_member_dot() => self.import(),
                Token::Word(word) if word == "export" && self.depth == 0 => self.export(),
                _ => self.pos += 1,
            }
        }
    }

    fn after_member_dot(&self) -> bool {
        self.pos > 0
            && self.token(self.pos - 1).is_some_and(|t| t.is_punct('.'))
            && !(self.pos > 2 && self.token(self.pos - 3).is_some_and(|t| t.is_punct('.')))
    }

    fn import(&mut self) {
        let next = self.pos + 1;
        match self.token(next) {
            Some(Token::Punct('(')) => {
                if let (Some(source), Some(true)) = (
                    self.str_at(next + 1),
                    self.token(next + 2).map(|t| t.is_punct(')')),
                ) {
                    self.syntax.add_dynamic_import(&source);
                }
                self.pos = next;
            }
            Some(Token::Punct('.')) => self.pos = next,
            Some(Token::Str(source)) if self.depth == 0 => {
                let source = source.clone();
                self.syntax.add_import(&source);
                self.pos = next + 1;
            }
            Some(_) if self.depth == 0 => {
                let mut j = next;
                while let Some(token) = self.token(j) {
                    if token.is_word("from") {
                        if let Some(source) = self.str_at(j + 1) {
                            self.syntax.add_import(&source);
                            j += 2;
                            break;
                        }
                    }
                    if token.is_punct(';') || token.is_word("import") || token.is_word("export") {
                        break;
                    }
                    j += 1;
                }
                self.pos = j;
            }
            _ => self.pos = next,
        }
    }

    fn export(&mut self) {
        let next = self.pos + 1;
        let Some(token) = self.token(next).cloned() else {
            self.pos = next;
            return;
        };
        match token {
            Token::Word(word) => match word.as_str() {
                "default" => {
                    self.syntax.add_export(LOCAL_EXPORTS, "default");
                    self.pos = next + 1;
                }
                "var" | "let" | "const" => self.declarations(next + 1),
                "function" => self.named_declaration(next + 1),
                "async" if self.token(next + 1).is_some_and(|t| t.is_word("function")) => {
                    self.named_declaration(next + 2)
                }
                "class" | "enum" => self.named_declaration(next + 1),
                _ => self.pos = next,
            },
            Token::Punct('*') => self.export_star(next + 1),
            Token::Punct('{') => self.export_list(next + 1),
            _ => self.pos = next,
        }
    }

    fn named_declaration(&mut self, mut j: usize) {
        if self.token(j).is_some_and(|t| t.is_punct('*')) {
            j += 1;
        }
        if let Some(Token::Word(name)) = self.token(j) {
            let name = name.clone();
            self.syntax.add_export(LOCAL_EXPORTS, &name);
            j += 1;
        }
        self.pos = j;
    }

    fn export_star(&mut self, mut j: usize) {
        let mut alias = None;
        if self.token(j).is_some_and(|t| t.is_word("as")) {
            alias = self.name_at(j + 1);
            j += 2;
        }
        if self.token(j).is_some_and(|t| t.is_word("from")) {
            if let Some(source) = self.str_at(j + 1) {
                self.syntax.add_import(&source);
                let name = alias.unwrap_or_else(|| STAR_REEXPORT.to_string());
                self.syntax.add_export(&source, &name);
                j += 2;
            }
        }
        self.pos = j;
    }

    fn export_list(&mut self, mut j: usize) {
        let mut names = Vec::new();
        while let Some(token) = self.token(j) {
            if token.is_punct('}') {
                j += 1;
                break;
            }
            if token.is_punct(',') {
                j += 1;
                continue;
            }
            let Some(local) = self.name_at(j) else {
                j += 1;
                continue;
            };
            if self.token(j + 1).is_some_and(|t| t.is_word("as")) {
                if let Some(exported) = self.name_at(j + 2) {
                    names.push(exported);
                }
                j += 3;
            } else {
                names.push(local);
                j += 1;
            }
        }
        let source = if self.token(j).is_some_and(|t| t.is_word("from")) {
            self.str_at(j + 1)
        } else {
            None
        };
        match source {
            Some(source) => {
                self.syntax.add_import(&source);
                for name in &names {
                    self.syntax.add_export(&source, name);
                }
                j += 2;
            }
            None => {
                for name in &names {
                    self.syntax.add_export(LOCAL_EXPORTS, name);
                }
            }
        }
        self.pos = j;
    }

    fn declarations(&mut self, mut j: usize) {
        loop {
            match self.token(j) {
                Some(Token::Word(name)) => {
                    let name = name.clone();
                    self.syntax.add_export(LOCAL_EXPORTS, &name);
                    j += 1;
                }
                Some(Token::Punct('{' | '[')) => j = self.pattern(j),
                _ => break,
            }
            if self.token(j).is_some_and(|t| t.is_punct('=')) {
                j = self.skip_initializer(j + 1);
            }
            if self.token(j).is_some_and(|t| t.is_punct(',')) {
                j += 1;
                continue;
            }
            break;
        }
        self.pos = j;
    }

    // Records binding names in a destructuring pattern; returns the index past its closing bracket.
    fn pattern(&mut self, start: usize) -> usize {
        let mut depth = 0usize;
        let mut j = start;
        while let Some(token) = self.token(j) {
            match token {
                Token::Punct('{' | '[' | '(') => depth += 1,
                Token::Punct('}' | ']' | ')') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return j + 1;
                    }
                }
                Token::Word(name) if self.is_pattern_binding(j) => {
                    let name = name.clone();
                    self.syntax.add_export(LOCAL_EXPORTS, &name);
                }
                _ => {}
            }
            j += 1;
        }
        j
    }

    fn is_pattern_binding(&self, j: usize) -> bool {
        let ends_binding = self
            .token(j + 1)
            .is_some_and(|t| matches!(t, Token::Punct(',' | '}' | ']' | '=')));
        if !ends_binding {
            return false;
        }
        let Some(prev) = j.checked_sub(1).and_then(|p| self.token(p)) else {
            return true;
        };
        if prev.is_punct('=') {
            return false;
        }
        if prev.is_punct('.') {
            return j >= 3 && self.token(j - 3).is_some_and(|t| t.is_punct('.'));
        }
        true
    }

    fn skip_initializer(&self, mut j: usize) -> usize {
        let mut depth = 0usize;
        while let Some(token) = self.token(j) {
            match token {
                Token::Punct('{' | '[' | '(') => depth += 1,
                Token::Punct('}' | ']' | ')') => {
                    if depth == 0 {
                        return j;
                    }
                    depth -= 1;
                }
                Token::Punct(',' | ';') if depth == 0 => return j,
                Token::Word(word) if depth == 0 && (word == "export" || word == "import") => {
                    return j;
                }
                _ => {}
            }
            j += 1;
        }
        j
    }
}
