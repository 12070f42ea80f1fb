//! The preprocessor: directives, macros, conditionals, loops and
//! interpolation.
//!
//! The preprocessor drives the shared token stream owned by the lexer.
//! Included files and macro expansions are spliced into that stream with
//! `Lexer::inject_tokens`; everything that survives directive handling is
//! re-serialized to *text*, which the driver re-lexes before parsing. The
//! text-based re-entry keeps `{expr}` interpolation and identifier
//! concatenation uniform no matter where the tokens came from.

pub mod evaluator;
pub mod macros;

use crate::error::{AsmError, AsmResult, SourceLoc};
use crate::keyword::{self, DirectiveType, KeywordKind, PragmaType};
use crate::lexer::{Lexer, TokenCache};
use crate::preprocessor::evaluator::Evaluator;
use crate::preprocessor::macros::{FunctionMacro, MacroTable, TextSubMacro};
use crate::token::{Token, TokenKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default limit on nested macro expansions.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 256;

/// Default limit on nested file inclusion.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 16;

/// Configuration options for the preprocessor.
#[derive(Clone, Debug)]
pub struct PreprocessorConfig {
    /// Limit on nested macro expansions.
    pub max_recursion_depth: usize,
    /// Limit on nested file inclusion.
    pub max_include_depth: usize,
    /// Directories searched by `.include`, after the including file's own
    /// directory.
    pub include_dirs: Vec<PathBuf>,
}

impl Default for PreprocessorConfig {
    fn default() -> PreprocessorConfig {
        PreprocessorConfig {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            include_dirs: Vec::new(),
        }
    }
}

/// The state of one conditional assembly block.
struct ConditionalState {
    /// A branch of this block has already been taken.
    condition_met: bool,
    /// Tokens of the current branch are being emitted.
    currently_active: bool,
    /// An `.else` has been seen in this block.
    else_seen: bool,
    /// Where the block started.
    location: SourceLoc,
}

enum LoopKind {
    Repeat { max_iterations: i64 },
    For {
        variable: String,
        current: i64,
        end: i64,
        step: i64,
    },
    While { condition: Vec<Token> },
}

/// The state of one loop assembly block.
struct LoopState {
    kind: LoopKind,
    iteration: i64,
    body: Vec<Token>,
    should_break: bool,
    /// Conditional-stack depth when the loop opened; restored when the loop
    /// ends so `.break` out of an open `.if` cannot leave frames behind.
    conditional_depth: usize,
    location: SourceLoc,
}

/// The preprocessor itself. Construct one per assembly invocation, run it,
/// then take the output text.
pub struct Preprocessor<'a> {
    config: PreprocessorConfig,
    cache: &'a mut TokenCache,
    lexer: Lexer,

    output: String,
    good: bool,
    poisoned: bool,
    needs_space: bool,

    macro_table: MacroTable,
    conditional_stack: Vec<ConditionalState>,
    loop_stack: Vec<LoopState>,
    expansion_depth: usize,

    /// Stack of files being processed; the top resolves relative includes.
    file_stack: Vec<PathBuf>,
    /// Files that executed `.pragma once`.
    pragma_once: HashSet<PathBuf>,
    /// Files that have been included at least once.
    included_files: HashSet<PathBuf>,
}

impl<'a> Preprocessor<'a> {
    /// Creates a preprocessor over an already-loaded lexer. `source_path`
    /// is the path of the initial file, when there is one; it anchors
    /// relative include resolution.
    pub fn new(
        config: PreprocessorConfig,
        lexer: Lexer,
        source_path: Option<&Path>,
        cache: &'a mut TokenCache,
    ) -> Preprocessor<'a> {
        let mut file_stack = Vec::new();
        if let Some(path) = source_path {
            if let Ok(canonical) = TokenCache::canonicalize(path) {
                file_stack.push(canonical);
            }
        }
        Preprocessor {
            config,
            cache,
            lexer,
            output: String::new(),
            good: false,
            poisoned: false,
            needs_space: false,
            macro_table: MacroTable::new(),
            conditional_stack: Vec::new(),
            loop_stack: Vec::new(),
            expansion_depth: 0,
            file_stack,
            pragma_once: HashSet::new(),
            included_files: HashSet::new(),
        }
    }

    /// The preprocessed source text, ready for re-lexing.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn is_good(&self) -> bool {
        self.good
    }

    /// Runs preprocessing to completion.
    pub fn run(&mut self) -> AsmResult<()> {
        let result = self.process();
        match &result {
            Ok(()) => self.good = true,
            Err(error) => {
                eprintln!("{}", error);
                self.good = false;
            }
        }
        result
    }

    fn process(&mut self) -> AsmResult<()> {
        loop {
            let token = match self.lexer.peek_token(0) {
                Ok(token) => token.clone(),
                Err(_) => break,
            };

            match token.kind {
                TokenKind::EndOfFile => break,
                TokenKind::ExpansionEnd => {
                    self.lexer.consume_token()?;
                    self.expansion_depth = self.expansion_depth.saturating_sub(1);
                }
                TokenKind::LoopEnd => {
                    self.lexer.consume_token()?;
                    self.handle_loop_end()?;
                }
                TokenKind::Backslash => {
                    if !self.handle_line_continuation()? {
                        self.emit_token(&token);
                        self.lexer.consume_token()?;
                    }
                }
                TokenKind::Keyword
                    if token.keyword_kind() == Some(KeywordKind::PreprocessorDirective) =>
                {
                    self.handle_directive(&token)?;
                }
                TokenKind::NewLine => {
                    self.lexer.consume_token()?;
                    self.emit_newline();
                }
                TokenKind::LeftBrace => {
                    self.handle_braced_expression(&token)?;
                }
                TokenKind::StringLiteral => {
                    self.lexer.consume_token()?;
                    let interpolated = self.interpolate_string(&token)?;
                    let mut emitted = token.clone();
                    emitted.lexeme = interpolated;
                    self.emit_token(&emitted);
                }
                TokenKind::Identifier => {
                    if !self.try_expand_macro(&token)? {
                        self.lexer.consume_token()?;
                        self.emit_token(&token);
                    }
                }
                _ => {
                    self.lexer.consume_token()?;
                    self.emit_token(&token);
                }
            }
        }

        if let Some(frame) = self.conditional_stack.last() {
            return err!(frame.location, "unterminated conditional block");
        }
        if let Some(frame) = self.loop_stack.last() {
            return err!(frame.location, "unterminated loop block");
        }
        if self.poisoned {
            return Err(AsmError::without_location(
                "preprocessing failed; errors were reported".to_owned(),
            ));
        }
        Ok(())
    }

    // Output building.

    fn no_space_before(kind: TokenKind) -> bool {
        match kind {
            TokenKind::LeftParen
            | TokenKind::RightParen
            | TokenKind::LeftBracket
            | TokenKind::RightBracket
            | TokenKind::Comma
            | TokenKind::Colon
            | TokenKind::NewLine => true,
            _ => false,
        }
    }

    fn no_space_after(kind: TokenKind) -> bool {
        match kind {
            TokenKind::LeftParen
            | TokenKind::RightParen
            | TokenKind::LeftBracket
            | TokenKind::RightBracket
            | TokenKind::Comma
            | TokenKind::Colon => true,
            _ => false,
        }
    }

    fn emit_token(&mut self, token: &Token) {
        if self.needs_space && !Preprocessor::no_space_before(token.kind) {
            self.output.push(' ');
        }
        match token.kind {
            TokenKind::StringLiteral => {
                self.output.push('"');
                self.output.push_str(&token.lexeme);
                self.output.push('"');
            }
            TokenKind::CharacterLiteral => {
                self.output.push('\'');
                self.output.push_str(&token.lexeme);
                self.output.push('\'');
            }
            _ => self.output.push_str(&token.lexeme),
        }
        self.needs_space = !Preprocessor::no_space_after(token.kind);
    }

    fn emit_text(&mut self, text: &str, spaced: bool) {
        if spaced && self.needs_space {
            self.output.push(' ');
        }
        self.output.push_str(text);
        self.needs_space = true;
    }

    fn emit_newline(&mut self) {
        self.output.push('\n');
        self.needs_space = false;
    }

    // Token collection helpers.

    /// Consumes the rest of the logical line, including its newline, and
    /// returns the tokens before the newline.
    fn collect_until_newline(&mut self) -> AsmResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            match token.kind {
                TokenKind::NewLine => {
                    self.lexer.consume_token()?;
                    break;
                }
                TokenKind::EndOfFile => break,
                TokenKind::Backslash => {
                    // Line continuation inside a directive argument.
                    if self.lexer.peek_token(1).map(|t| t.kind) == Ok(TokenKind::NewLine) {
                        self.lexer.consume_token()?;
                        self.lexer.consume_token()?;
                        continue;
                    }
                    self.lexer.consume_token()?;
                    tokens.push(token);
                }
                _ => {
                    self.lexer.consume_token()?;
                    tokens.push(token);
                }
            }
        }
        Ok(tokens)
    }

    /// Collects a block body up to its matching end directive, honoring
    /// nesting of `open`. The end directive and its line are consumed but
    /// not returned.
    fn collect_body(
        &mut self,
        open: DirectiveType,
        close: DirectiveType,
        start: &SourceLoc,
    ) -> AsmResult<Vec<Token>> {
        let mut body = Vec::new();
        let mut nesting = 0usize;
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            if token.kind == TokenKind::EndOfFile {
                return err!(start, "unterminated block; missing matching end directive");
            }
            if let Some(directive) = directive_of(&token) {
                if directive == open {
                    nesting += 1;
                } else if directive == close {
                    if nesting == 0 {
                        self.lexer.consume_token()?;
                        // Consume the end directive's own line ending.
                        if self.lexer.peek_token(0).map(|t| t.kind) == Ok(TokenKind::NewLine) {
                            self.lexer.consume_token()?;
                        }
                        return Ok(body);
                    }
                    nesting -= 1;
                }
            }
            self.lexer.consume_token()?;
            body.push(token);
        }
    }

    fn handle_line_continuation(&mut self) -> AsmResult<bool> {
        if self.lexer.peek_token(1).map(|t| t.kind) == Ok(TokenKind::NewLine) {
            self.lexer.consume_token()?;
            self.lexer.consume_token()?;
            return Ok(true);
        }
        Ok(false)
    }

    // Conditional assembly.

    fn parent_branches_active(&self) -> bool {
        self.conditional_stack
            .iter()
            .all(|frame| frame.currently_active)
    }

    fn evaluate_condition(&mut self, tokens: &[Token], directive: &str) -> AsmResult<bool> {
        self.validate_no_braces(tokens, directive)?;
        let value = Evaluator::new(tokens, &self.macro_table).evaluate()?;
        Ok(value.is_truthy())
    }

    fn validate_no_braces(&self, tokens: &[Token], directive: &str) -> AsmResult<()> {
        for token in tokens {
            if token.kind == TokenKind::LeftBrace || token.kind == TokenKind::RightBrace {
                return err!(
                    token.location,
                    "braces are not allowed in the argument of {}",
                    directive
                );
            }
        }
        Ok(())
    }

    /// Skips tokens of an inactive branch up to, but not past, the next
    /// `.elif`/`.else`/`.endif` at the same nesting level.
    fn skip_conditional_block(&mut self, start: &SourceLoc) -> AsmResult<()> {
        let mut nesting = 0usize;
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            if token.kind == TokenKind::EndOfFile {
                return err!(start, "unterminated conditional block");
            }
            if let Some(directive) = directive_of(&token) {
                match directive {
                    DirectiveType::If | DirectiveType::IfDef | DirectiveType::IfNdef => {
                        nesting += 1;
                    }
                    DirectiveType::ElseIf | DirectiveType::Else if nesting == 0 => {
                        return Ok(());
                    }
                    DirectiveType::EndIf => {
                        if nesting == 0 {
                            return Ok(());
                        }
                        nesting -= 1;
                    }
                    _ => {}
                }
            }
            self.lexer.consume_token()?;
        }
    }

    // Loops.

    fn handle_loop_end(&mut self) -> AsmResult<()> {
        let conditional_depth;
        let inject;
        {
            let frame = match self.loop_stack.last_mut() {
                Some(frame) => frame,
                None => {
                    return Err(AsmError::without_location(
                        "internal loop marker without a loop".to_owned(),
                    ))
                }
            };
            conditional_depth = frame.conditional_depth;

            if frame.should_break {
                inject = false;
            } else {
                frame.iteration += 1;
                inject = match &mut frame.kind {
                    LoopKind::Repeat { max_iterations } => frame.iteration < *max_iterations,
                    LoopKind::For {
                        current, end, step, ..
                    } => {
                        *current += *step;
                        if *step > 0 {
                            *current < *end
                        } else {
                            *current > *end
                        }
                    }
                    LoopKind::While { .. } => true,
                };
            }
        }

        // Conditionals opened inside the finished pass may not leak out.
        self.conditional_stack.truncate(conditional_depth);

        if !inject {
            self.loop_stack.pop();
            return Ok(());
        }

        // Re-evaluate a `.while` condition and rebind a `.for` variable
        // before running the next pass.
        enum NextPass {
            Plain,
            While(Vec<Token>),
            For(String, i64, SourceLoc),
        }
        let next = {
            let frame = self.loop_stack.last().unwrap();
            match &frame.kind {
                LoopKind::While { condition } => NextPass::While(condition.clone()),
                LoopKind::For {
                    variable, current, ..
                } => NextPass::For(variable.clone(), *current, frame.location.clone()),
                LoopKind::Repeat { .. } => NextPass::Plain,
            }
        };
        match next {
            NextPass::While(condition) => {
                if !self.evaluate_condition(&condition, "`.while`")? {
                    self.loop_stack.pop();
                    return Ok(());
                }
            }
            NextPass::For(variable, current, location) => {
                self.bind_loop_variable(&variable, current, &location);
            }
            NextPass::Plain => {}
        }
        self.inject_loop_pass();
        Ok(())
    }

    fn inject_loop_pass(&mut self) {
        let frame = self.loop_stack.last().unwrap();
        let mut tokens = frame.body.clone();
        tokens.push(Token::new(TokenKind::LoopEnd, "", frame.location.clone()));
        self.lexer.inject_tokens(tokens, false);
    }

    fn bind_loop_variable(&mut self, name: &str, value: i64, location: &SourceLoc) {
        let mut token = Token::new(TokenKind::IntegerLiteral, &value.to_string(), location.clone());
        token.int_value = Some(value);
        token.number_value = Some(value as f64);
        self.macro_table.define_text_sub(TextSubMacro {
            name: name.to_owned(),
            replacement: vec![token],
        });
    }

    fn skip_to_loop_end(&mut self, location: &SourceLoc) -> AsmResult<()> {
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            match token.kind {
                TokenKind::LoopEnd => return Ok(()),
                TokenKind::EndOfFile => {
                    return err!(location, "loop control directive outside of a loop pass");
                }
                _ => {
                    self.lexer.consume_token()?;
                }
            }
        }
    }

    // Directive dispatch.

    fn handle_directive(&mut self, token: &Token) -> AsmResult<()> {
        let directive = directive_of(token).ok_or_else(|| AsmError {
            location: Some(token.location.clone()),
            message: format!("'{}' is not a preprocessor directive", token.lexeme),
        })?;

        // In an inactive conditional branch only the conditional directives
        // themselves are interpreted.
        if !self.parent_branches_active() {
            match directive {
                DirectiveType::If
                | DirectiveType::IfDef
                | DirectiveType::IfNdef
                | DirectiveType::ElseIf
                | DirectiveType::Else
                | DirectiveType::EndIf => {}
                _ => {
                    self.lexer.consume_token()?;
                    return Ok(());
                }
            }
        }

        self.lexer.consume_token()?;

        match directive {
            DirectiveType::Pragma => self.handle_pragma(token),
            DirectiveType::Include => self.handle_include(token),
            DirectiveType::Define => self.handle_define(token),
            DirectiveType::Macro => self.handle_macro(token),
            DirectiveType::EndMacro => err!(
                token.location,
                "'{}' without a matching '.macro'",
                token.lexeme
            ),
            DirectiveType::Undef => self.handle_undef(token),
            DirectiveType::IfDef => self.handle_ifdef(token, false),
            DirectiveType::IfNdef => self.handle_ifdef(token, true),
            DirectiveType::If => self.handle_if(token),
            DirectiveType::ElseIf => self.handle_elseif(token),
            DirectiveType::Else => self.handle_else(token),
            DirectiveType::EndIf => self.handle_endif(token),
            DirectiveType::Repeat => self.handle_repeat(token),
            DirectiveType::EndRepeat => err!(
                token.location,
                "'{}' without a matching '.repeat'",
                token.lexeme
            ),
            DirectiveType::For => self.handle_for(token),
            DirectiveType::EndFor => err!(
                token.location,
                "'{}' without a matching '.for'",
                token.lexeme
            ),
            DirectiveType::While => self.handle_while(token),
            DirectiveType::EndWhile => err!(
                token.location,
                "'{}' without a matching '.while'",
                token.lexeme
            ),
            DirectiveType::Continue => self.handle_loop_control(token, false),
            DirectiveType::Break => self.handle_loop_control(token, true),
            DirectiveType::Info => self.handle_diagnostic(token, "info"),
            DirectiveType::Warning => self.handle_diagnostic(token, "warning"),
            DirectiveType::Error => self.handle_diagnostic(token, "error"),
            DirectiveType::Fatal => self.handle_fatal(token),
            DirectiveType::Assert => self.handle_assert(token),
            other => err!(
                token.location,
                "'{}' ({:?}) is not handled by the preprocessor",
                token.lexeme,
                other
            ),
        }
    }

    fn handle_pragma(&mut self, directive: &Token) -> AsmResult<()> {
        let name = self.lexer.peek_token(0)?.clone();
        let pragma = name
            .keyword
            .and_then(|id| keyword::get(id).pragma())
            .ok_or_else(|| AsmError {
                location: Some(name.location.clone()),
                message: format!("unknown pragma '{}'", name.lexeme),
            })?;
        self.lexer.consume_token()?;

        match pragma {
            PragmaType::Once => {
                if let Some(current) = self.file_stack.last() {
                    self.pragma_once.insert(current.clone());
                }
                self.collect_until_newline()?;
                Ok(())
            }
            PragmaType::MaxRecursionDepth | PragmaType::MaxIncludeDepth => {
                let value = self.lexer.peek_token(0)?.clone();
                let amount = match (value.kind, value.int_value) {
                    (TokenKind::IntegerLiteral, Some(amount)) if amount > 0 => amount as usize,
                    _ => {
                        return err!(
                            value.location,
                            "pragma '{}' expects a positive integer",
                            name.lexeme
                        );
                    }
                };
                self.lexer.consume_token()?;
                if pragma == PragmaType::MaxRecursionDepth {
                    self.config.max_recursion_depth = amount;
                } else {
                    self.config.max_include_depth = amount;
                }
                self.collect_until_newline()?;
                Ok(())
            }
            PragmaType::PushFile => {
                let path = self.lexer.peek_token(0)?.clone();
                if path.kind != TokenKind::StringLiteral {
                    return err!(directive.location, "push_file pragma expects a file path");
                }
                self.lexer.consume_token()?;
                self.file_stack.push(PathBuf::from(&path.lexeme));
                self.collect_until_newline()?;
                Ok(())
            }
            PragmaType::PopFile => {
                self.file_stack.pop();
                self.collect_until_newline()?;
                Ok(())
            }
        }
    }

    fn resolve_include(&self, request: &str) -> Option<PathBuf> {
        let requested = Path::new(request);
        let mut candidates = Vec::new();
        if let Some(current) = self.file_stack.last() {
            if let Some(parent) = current.parent() {
                candidates.push(parent.join(requested));
            }
        }
        for dir in &self.config.include_dirs {
            candidates.push(dir.join(requested));
        }
        candidates.push(requested.to_path_buf());

        candidates
            .into_iter()
            .find_map(|candidate| candidate.canonicalize().ok())
    }

    fn handle_include(&mut self, directive: &Token) -> AsmResult<()> {
        let path_token = self.lexer.peek_token(0)?.clone();
        if path_token.kind != TokenKind::StringLiteral {
            return err!(directive.location, ".include expects a quoted file path");
        }
        self.lexer.consume_token()?;
        self.collect_until_newline()?;

        let resolved = self.resolve_include(&path_token.lexeme).ok_or_else(|| AsmError {
            location: Some(path_token.location.clone()),
            message: format!("cannot resolve include file '{}'", path_token.lexeme),
        })?;

        // Files that executed `.pragma once` are included at most once.
        if self.pragma_once.contains(&resolved) && self.included_files.contains(&resolved) {
            return Ok(());
        }

        if self.file_stack.len() >= self.config.max_include_depth {
            return err!(
                directive.location,
                "maximum include depth ({}) exceeded",
                self.config.max_include_depth
            );
        }

        let mut file_tokens = self.cache.tokens_for(&resolved)?;
        while file_tokens
            .last()
            .map_or(false, |t| t.kind == TokenKind::EndOfFile)
        {
            file_tokens.pop();
        }
        self.included_files.insert(resolved.clone());

        // Wrap the spliced tokens in automatic push_file/pop_file pragmas so
        // nested includes resolve relative to the right directory.
        let location = directive.location.clone();
        let mut injected = Vec::with_capacity(file_tokens.len() + 8);
        injected.extend(pragma_marker_tokens(
            "push_file",
            Some(&resolved.to_string_lossy()),
            &location,
        ));
        injected.extend(file_tokens);
        if injected.last().map(|t| t.kind) != Some(TokenKind::NewLine) {
            injected.push(Token::new(TokenKind::NewLine, "\n", location.clone()));
        }
        injected.extend(pragma_marker_tokens("pop_file", None, &location));
        self.lexer.inject_tokens(injected, false);
        Ok(())
    }

    fn handle_define(&mut self, directive: &Token) -> AsmResult<()> {
        let name = self.lexer.peek_token(0)?.clone();
        if name.kind != TokenKind::Identifier {
            return err!(directive.location, ".define expects a macro name");
        }
        self.lexer.consume_token()?;
        let replacement = self.collect_until_newline()?;
        self.macro_table.define_text_sub(TextSubMacro {
            name: name.lexeme,
            replacement,
        });
        Ok(())
    }

    fn handle_macro(&mut self, directive: &Token) -> AsmResult<()> {
        let name = self.lexer.peek_token(0)?.clone();
        if name.kind != TokenKind::Identifier {
            return err!(directive.location, ".macro expects a macro name");
        }
        self.lexer.consume_token()?;

        let mut params = Vec::new();
        let mut variadic = false;
        let next = self.lexer.peek_token(0)?.clone();
        if next.kind == TokenKind::LeftParen {
            self.lexer.consume_token()?;
            loop {
                let token = self.lexer.peek_token(0)?.clone();
                match token.kind {
                    TokenKind::RightParen => {
                        self.lexer.consume_token()?;
                        break;
                    }
                    // The variadic tail `...` scans as one identifier made
                    // of dots.
                    TokenKind::Identifier if token.lexeme == "..." => {
                        self.lexer.consume_token()?;
                        variadic = true;
                    }
                    TokenKind::Identifier => {
                        if variadic {
                            return err!(
                                token.location,
                                "no parameters may follow the variadic tail"
                            );
                        }
                        self.lexer.consume_token()?;
                        params.push(token.lexeme);
                        let after = self.lexer.peek_token(0)?.clone();
                        if after.kind == TokenKind::Comma {
                            self.lexer.consume_token()?;
                        }
                    }
                    _ => {
                        return err!(
                            token.location,
                            "unexpected '{}' in macro parameter list",
                            token.lexeme
                        );
                    }
                }
            }
        }

        // Consume the rest of the definition line before the body.
        self.collect_until_newline()?;
        let body = self.collect_body(
            DirectiveType::Macro,
            DirectiveType::EndMacro,
            &directive.location,
        )?;

        self.macro_table.define_function(FunctionMacro {
            name: name.lexeme,
            params,
            variadic,
            body,
        });
        Ok(())
    }

    fn handle_undef(&mut self, directive: &Token) -> AsmResult<()> {
        let name = self.lexer.peek_token(0)?.clone();
        if name.kind != TokenKind::Identifier {
            return err!(directive.location, ".undef expects a macro name");
        }
        self.lexer.consume_token()?;
        self.collect_until_newline()?;
        if !self.macro_table.undefine(&name.lexeme) {
            return err!(name.location, "macro '{}' is not defined", name.lexeme);
        }
        Ok(())
    }

    fn handle_ifdef(&mut self, directive: &Token, negate: bool) -> AsmResult<()> {
        let parent_active = self.parent_branches_active();
        let name = self.lexer.peek_token(0)?.clone();
        if name.kind != TokenKind::Identifier {
            return err!(directive.location, "{} expects a macro name", directive.lexeme);
        }
        self.lexer.consume_token()?;
        self.collect_until_newline()?;

        let mut condition = self.macro_table.is_defined(&name.lexeme);
        if negate {
            condition = !condition;
        }
        let active = parent_active && condition;
        self.conditional_stack.push(ConditionalState {
            condition_met: active,
            currently_active: active,
            else_seen: false,
            location: directive.location.clone(),
        });
        if !active {
            self.skip_conditional_block(&directive.location)?;
        }
        Ok(())
    }

    fn handle_if(&mut self, directive: &Token) -> AsmResult<()> {
        let parent_active = self.parent_branches_active();
        let condition_tokens = self.collect_until_newline()?;

        let active = if parent_active {
            self.evaluate_condition(&condition_tokens, "`.if`")?
        } else {
            false
        };
        self.conditional_stack.push(ConditionalState {
            condition_met: active,
            currently_active: active,
            else_seen: false,
            location: directive.location.clone(),
        });
        if !active {
            self.skip_conditional_block(&directive.location)?;
        }
        Ok(())
    }

    fn handle_elseif(&mut self, directive: &Token) -> AsmResult<()> {
        let parent_active = self
            .conditional_stack
            .iter()
            .rev()
            .skip(1)
            .all(|frame| frame.currently_active);
        let condition_tokens = self.collect_until_newline()?;

        let frame_state = match self.conditional_stack.last() {
            Some(frame) => (frame.condition_met, frame.else_seen),
            None => {
                return err!(directive.location, "'{}' without a matching '.if'", directive.lexeme);
            }
        };
        if frame_state.1 {
            return err!(directive.location, "'{}' after '.else'", directive.lexeme);
        }

        let active = if frame_state.0 || !parent_active {
            false
        } else {
            self.evaluate_condition(&condition_tokens, "`.elif`")?
        };

        {
            let frame = self.conditional_stack.last_mut().unwrap();
            frame.currently_active = active;
            frame.condition_met = frame.condition_met || active;
        }
        if !active {
            self.skip_conditional_block(&directive.location)?;
        }
        Ok(())
    }

    fn handle_else(&mut self, directive: &Token) -> AsmResult<()> {
        let parent_active = self
            .conditional_stack
            .iter()
            .rev()
            .skip(1)
            .all(|frame| frame.currently_active);
        self.collect_until_newline()?;

        let active;
        {
            let frame = match self.conditional_stack.last_mut() {
                Some(frame) => frame,
                None => {
                    return err!(
                        directive.location,
                        "'{}' without a matching '.if'",
                        directive.lexeme
                    );
                }
            };
            if frame.else_seen {
                return err!(directive.location, "duplicate '.else'");
            }
            frame.else_seen = true;
            active = parent_active && !frame.condition_met;
            frame.currently_active = active;
            frame.condition_met = frame.condition_met || active;
        }
        if !active {
            self.skip_conditional_block(&directive.location)?;
        }
        Ok(())
    }

    fn handle_endif(&mut self, directive: &Token) -> AsmResult<()> {
        self.collect_until_newline()?;
        if self.conditional_stack.pop().is_none() {
            return err!(
                directive.location,
                "'{}' without a matching '.if'",
                directive.lexeme
            );
        }
        Ok(())
    }

    fn handle_repeat(&mut self, directive: &Token) -> AsmResult<()> {
        let count_tokens = self.collect_until_newline()?;
        self.validate_no_braces(&count_tokens, "`.repeat`")?;
        let count = Evaluator::new(&count_tokens, &self.macro_table).evaluate()?;
        let count = match count {
            evaluator::PpValue::Integer(value) if value >= 0 => value,
            _ => {
                return err!(directive.location, ".repeat expects a non-negative count");
            }
        };

        let body = self.collect_body(
            DirectiveType::Repeat,
            DirectiveType::EndRepeat,
            &directive.location,
        )?;

        if count == 0 {
            return Ok(());
        }
        self.loop_stack.push(LoopState {
            kind: LoopKind::Repeat {
                max_iterations: count,
            },
            iteration: 0,
            body,
            should_break: false,
            conditional_depth: self.conditional_stack.len(),
            location: directive.location.clone(),
        });
        self.inject_loop_pass();
        Ok(())
    }

    fn handle_for(&mut self, directive: &Token) -> AsmResult<()> {
        let name = self.lexer.peek_token(0)?.clone();
        if name.kind != TokenKind::Identifier {
            return err!(directive.location, ".for expects a loop variable name");
        }
        self.lexer.consume_token()?;

        let assign = self.lexer.peek_token(0)?.clone();
        if assign.kind != TokenKind::AssignEqual {
            return err!(assign.location, "expected '=' after .for loop variable");
        }
        self.lexer.consume_token()?;

        let argument_tokens = self.collect_until_newline()?;
        self.validate_no_braces(&argument_tokens, "`.for`")?;
        let groups = split_on_commas(&argument_tokens);
        if groups.len() < 2 || groups.len() > 3 {
            return err!(
                directive.location,
                ".for expects 'start, end[, step]' bounds"
            );
        }

        let mut values = Vec::new();
        for group in &groups {
            let value = Evaluator::new(group, &self.macro_table).evaluate()?;
            match value {
                evaluator::PpValue::Integer(value) => values.push(value),
                other => {
                    return err!(
                        directive.location,
                        ".for bounds must be integers, found {}",
                        other.type_of()
                    );
                }
            }
        }
        let (start, end) = (values[0], values[1]);
        let step = values.get(2).copied().unwrap_or(1);
        if step == 0 {
            return err!(directive.location, ".for step must not be zero");
        }

        let body = self.collect_body(
            DirectiveType::For,
            DirectiveType::EndFor,
            &directive.location,
        )?;

        let runs = if step > 0 { start < end } else { start > end };
        if !runs {
            return Ok(());
        }

        self.bind_loop_variable(&name.lexeme, start, &directive.location);
        self.loop_stack.push(LoopState {
            kind: LoopKind::For {
                variable: name.lexeme,
                current: start,
                end,
                step,
            },
            iteration: 0,
            body,
            should_break: false,
            conditional_depth: self.conditional_stack.len(),
            location: directive.location.clone(),
        });
        self.inject_loop_pass();
        Ok(())
    }

    fn handle_while(&mut self, directive: &Token) -> AsmResult<()> {
        let condition = self.collect_until_newline()?;
        self.validate_no_braces(&condition, "`.while`")?;
        let body = self.collect_body(
            DirectiveType::While,
            DirectiveType::EndWhile,
            &directive.location,
        )?;

        if !self.evaluate_condition(&condition, "`.while`")? {
            return Ok(());
        }

        self.loop_stack.push(LoopState {
            kind: LoopKind::While { condition },
            iteration: 0,
            body,
            should_break: false,
            conditional_depth: self.conditional_stack.len(),
            location: directive.location.clone(),
        });
        self.inject_loop_pass();
        Ok(())
    }

    fn handle_loop_control(&mut self, directive: &Token, is_break: bool) -> AsmResult<()> {
        self.collect_until_newline()?;
        match self.loop_stack.last_mut() {
            Some(frame) => {
                if is_break {
                    frame.should_break = true;
                }
            }
            None => {
                return err!(
                    directive.location,
                    "'{}' outside of a loop",
                    directive.lexeme
                );
            }
        }
        self.skip_to_loop_end(&directive.location)
    }

    fn render_message(&mut self, tokens: &[Token]) -> AsmResult<String> {
        // A single string literal is interpolated; anything else is
        // evaluated as an expression and rendered.
        if tokens.len() == 1 && tokens[0].kind == TokenKind::StringLiteral {
            return self.interpolate_string(&tokens[0]);
        }
        if tokens.is_empty() {
            return Ok(String::new());
        }
        let value = Evaluator::new(tokens, &self.macro_table).evaluate()?;
        Ok(value.render())
    }

    fn handle_diagnostic(&mut self, directive: &Token, severity: &str) -> AsmResult<()> {
        let tokens = self.collect_until_newline()?;
        let message = self.render_message(&tokens)?;
        eprintln!("{}: {}: {}", directive.location, severity, message);
        if severity == "error" {
            self.poisoned = true;
        }
        Ok(())
    }

    fn handle_fatal(&mut self, directive: &Token) -> AsmResult<()> {
        let tokens = self.collect_until_newline()?;
        let message = self.render_message(&tokens)?;
        err!(directive.location, "fatal: {}", message)
    }

    fn handle_assert(&mut self, directive: &Token) -> AsmResult<()> {
        let tokens = self.collect_until_newline()?;
        if !self.evaluate_condition(&tokens, "`.assert`")? {
            let text: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
            return err!(directive.location, "assertion failed: {}", text.join(" "));
        }
        Ok(())
    }

    // Macro expansion.

    fn try_expand_macro(&mut self, token: &Token) -> AsmResult<bool> {
        let follows_paren = self
            .lexer
            .peek_token(1)
            .map(|t| t.kind == TokenKind::LeftParen)
            .unwrap_or(false);

        if follows_paren && self.macro_table.lookup_function(&token.lexeme).is_some() {
            return self.expand_function_macro(token).map(|_| true);
        }

        if self.macro_table.lookup_text_sub(&token.lexeme).is_some() {
            let replacement = self
                .macro_table
                .lookup_text_sub(&token.lexeme)
                .unwrap()
                .replacement
                .clone();
            self.lexer.consume_token()?;
            self.splice_expansion(replacement, &token.location)?;
            return Ok(true);
        }

        Ok(false)
    }

    fn splice_expansion(&mut self, mut tokens: Vec<Token>, location: &SourceLoc) -> AsmResult<()> {
        if self.expansion_depth >= self.config.max_recursion_depth {
            return err!(
                location,
                "maximum macro recursion depth ({}) exceeded",
                self.config.max_recursion_depth
            );
        }
        self.expansion_depth += 1;
        tokens.push(Token::new(TokenKind::ExpansionEnd, "", location.clone()));
        self.lexer.inject_tokens(tokens, false);
        Ok(())
    }

    fn expand_function_macro(&mut self, name_token: &Token) -> AsmResult<()> {
        let entry = self
            .macro_table
            .lookup_function(&name_token.lexeme)
            .unwrap();
        let params = entry.params.clone();
        let variadic = entry.variadic;
        let body = entry.body.clone();

        self.lexer.consume_token()?; // name
        self.lexer.consume_token()?; // '('

        // Collect the argument tokens up to the matching ')'.
        let mut depth = 0usize;
        let mut arg_tokens = Vec::new();
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            match token.kind {
                TokenKind::EndOfFile => {
                    return err!(
                        name_token.location,
                        "unterminated argument list in call to macro '{}'",
                        name_token.lexeme
                    );
                }
                TokenKind::LeftParen => {
                    depth += 1;
                    self.lexer.consume_token()?;
                    arg_tokens.push(token);
                }
                TokenKind::RightParen => {
                    self.lexer.consume_token()?;
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    arg_tokens.push(token);
                }
                _ => {
                    self.lexer.consume_token()?;
                    arg_tokens.push(token);
                }
            }
        }

        let mut args = if arg_tokens.is_empty() {
            Vec::new()
        } else {
            split_on_commas(&arg_tokens)
        };

        if variadic {
            if args.len() < params.len() {
                return err!(
                    name_token.location,
                    "macro '{}' expects at least {} argument(s), got {}",
                    name_token.lexeme,
                    params.len(),
                    args.len()
                );
            }
        } else if args.len() != params.len() {
            return err!(
                name_token.location,
                "macro '{}' expects {} argument(s), got {}",
                name_token.lexeme,
                params.len(),
                args.len()
            );
        }

        // Fold surplus variadic arguments into the last parameter,
        // comma-separated.
        if variadic && !params.is_empty() && args.len() > params.len() {
            let mut tail = args.split_off(params.len() - 1);
            let mut folded = tail.remove(0);
            for group in tail {
                folded.push(Token::new(
                    TokenKind::Comma,
                    ",",
                    name_token.location.clone(),
                ));
                folded.extend(group);
            }
            args.push(folded);
        }

        // Substitute placeholders in the body.
        let mut expansion = Vec::with_capacity(body.len());
        for token in &body {
            let is_placeholder = token.kind == TokenKind::Placeholder
                || token.kind == TokenKind::PlaceholderKeyword;
            if is_placeholder {
                let placeholder_name = &token.lexeme[1..];
                if let Some(index) = params.iter().position(|p| p == placeholder_name) {
                    if let Some(group) = args.get(index) {
                        expansion.extend(group.iter().cloned());
                        continue;
                    }
                }
            }
            expansion.push(token.clone());
        }

        self.splice_expansion(expansion, &name_token.location)
    }

    // Interpolation.

    fn handle_braced_expression(&mut self, brace: &Token) -> AsmResult<()> {
        // Adjacency with the token before the brace decides whether the
        // rendered value concatenates onto an identifier.
        let adjacent_before = self
            .lexer
            .peek_token(-1)
            .map(|prev| tokens_adjacent(prev, brace))
            .unwrap_or(false);

        self.lexer.consume_token()?;

        let mut depth = 0usize;
        let mut tokens = Vec::new();
        let close;
        loop {
            let token = self.lexer.peek_token(0)?.clone();
            match token.kind {
                TokenKind::EndOfFile | TokenKind::NewLine => {
                    return err!(brace.location, "unterminated '{{' expression");
                }
                TokenKind::LeftBrace => {
                    depth += 1;
                    self.lexer.consume_token()?;
                    tokens.push(token);
                }
                TokenKind::RightBrace => {
                    self.lexer.consume_token()?;
                    if depth == 0 {
                        close = token;
                        break;
                    }
                    depth -= 1;
                    tokens.push(token);
                }
                _ => {
                    self.lexer.consume_token()?;
                    tokens.push(token);
                }
            }
        }

        let value = Evaluator::new(&tokens, &self.macro_table).evaluate()?;
        let rendered = value.render();

        self.emit_text(&rendered, !adjacent_before);

        // If the next token is glued to the closing brace, suppress the
        // space so `pre_{x}_post` style names concatenate.
        if let Ok(next) = self.lexer.peek_token(0) {
            if tokens_adjacent(&close, next) {
                self.needs_space = false;
            }
        }
        Ok(())
    }

    fn interpolate_string(&mut self, token: &Token) -> AsmResult<String> {
        let text = &token.lexeme;
        if !text.contains('{') {
            return Ok(text.clone());
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text.as_str();
        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let close = after_open.find('}').ok_or_else(|| AsmError {
                location: Some(token.location.clone()),
                message: "unterminated '{' expression in string literal".to_owned(),
            })?;
            let expression = &after_open[..close];

            let mut sub_lexer = Lexer::new();
            sub_lexer.load_from_string(expression)?;
            let mut expr_tokens: Vec<Token> = sub_lexer.tokens().to_vec();
            expr_tokens.retain(|t| {
                t.kind != TokenKind::NewLine && t.kind != TokenKind::EndOfFile
            });
            let value = Evaluator::new(&expr_tokens, &self.macro_table).evaluate()?;
            result.push_str(&value.render());

            rest = &after_open[close + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }
}

/// The directive a token names, if it is a directive keyword.
fn directive_of(token: &Token) -> Option<DirectiveType> {
    match token.kind {
        TokenKind::Keyword => token.keyword.and_then(|id| {
            let entry = keyword::get(id);
            match entry.kind {
                KeywordKind::PreprocessorDirective => entry.directive(),
                _ => None,
            }
        }),
        _ => None,
    }
}

/// Splits a token sequence on top-level commas (commas inside parentheses
/// or brackets do not split).
fn split_on_commas(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut groups = vec![Vec::new()];
    let mut depth = 0usize;
    for token in tokens {
        match token.kind {
            TokenKind::LeftParen | TokenKind::LeftBracket => {
                depth += 1;
                groups.last_mut().unwrap().push(token.clone());
            }
            TokenKind::RightParen | TokenKind::RightBracket => {
                depth = depth.saturating_sub(1);
                groups.last_mut().unwrap().push(token.clone());
            }
            TokenKind::Comma if depth == 0 => groups.push(Vec::new()),
            _ => groups.last_mut().unwrap().push(token.clone()),
        }
    }
    groups
}

/// `true` when `second` begins exactly where `first` ends, with no
/// whitespace in between.
fn tokens_adjacent(first: &Token, second: &Token) -> bool {
    first.location.file == second.location.file
        && first.location.line == second.location.line
        && first.location.column + rendered_width(first) == second.location.column
}

fn rendered_width(token: &Token) -> usize {
    match token.kind {
        // Quoted literals occupy their lexeme plus both quotes.
        TokenKind::StringLiteral | TokenKind::CharacterLiteral => token.lexeme.len() + 2,
        _ => token.lexeme.len(),
    }
}

/// Builds the token sequence for an automatically inserted pragma line,
/// e.g. `.pragma push_file "path"`.
fn pragma_marker_tokens(pragma: &str, path: Option<&str>, location: &SourceLoc) -> Vec<Token> {
    let mut tokens = Vec::new();

    let mut directive = Token::new(TokenKind::Keyword, ".pragma", location.clone());
    directive.keyword = keyword::lookup(".pragma");
    tokens.push(directive);

    let mut name = Token::new(TokenKind::Keyword, pragma, location.clone());
    name.keyword = keyword::lookup(pragma);
    tokens.push(name);

    if let Some(path) = path {
        tokens.push(Token::new(TokenKind::StringLiteral, path, location.clone()));
    }
    tokens.push(Token::new(TokenKind::NewLine, "\n", location.clone()));
    tokens
}
