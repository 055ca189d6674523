use std::fs;
use std::path::PathBuf;

use clap::Parser;
use lucerna::{Error, Registry, Token};

#[derive(Parser)]
#[command(name = "lucerna-cli")]
#[command(about = "Tokenizes a file with a TextMate-style grammar")]
struct Args {
    /// Path to the file to tokenize
    file: PathBuf,
    /// Grammar name, alias or scope name
    #[arg(short, long, default_value = "source.lua")]
    grammar: String,
    /// A grammar file to load on top of the bundled one
    #[arg(long)]
    grammar_file: Option<PathBuf>,
    /// Print the tokens as JSON
    #[arg(long)]
    json: bool,
    /// Tokenize line by line, spans are then relative to each line
    #[arg(long)]
    lines: bool,
    /// Print the indentation hints of each line instead of tokens
    #[arg(long, conflicts_with_all = ["json", "lines"])]
    indent: bool,
}

fn print_tokens(text: &str, tokens: &[Token], line_idx: Option<usize>) {
    for token in tokens {
        let scopes: Vec<String> = token.scopes.iter().map(|s| s.to_string()).collect();
        if let Some(line) = line_idx {
            print!("{}:", line + 1);
        }
        println!(
            "[{}-{}] {:?} {}",
            token.span.start,
            token.span.end,
            token.text(text),
            scopes.join(" ")
        );
    }
}

fn print_indent_hints(
    registry: &Registry,
    grammar_name: &str,
    content: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let grammar = registry
        .grammar(grammar_name)
        .ok_or_else(|| Error::GrammarNotFound(grammar_name.to_string()))?;
    let Some(settings) = registry.settings_for(&grammar.scope_name) else {
        eprintln!("No editor settings for {}", grammar.scope_name);
        return Ok(());
    };

    for line in content.lines() {
        let decrease = if settings.suggests_indent_decrease(line) { '<' } else { ' ' };
        let increase = if settings.suggests_indent_increase(line) { '>' } else { ' ' };
        println!("{decrease}{increase} {line}");
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut registry = Registry::builtin()?;
    if let Some(path) = &args.grammar_file {
        registry.add_grammar_from_path(path)?;
    }
    let content = fs::read_to_string(&args.file)?;

    if args.indent {
        return print_indent_hints(&registry, &args.grammar, &content);
    }

    if args.lines {
        let lines = registry.tokenize_lines(&args.grammar, &content)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&lines)?);
        } else {
            for (line_idx, (line, tokens)) in content.split_inclusive('\n').zip(&lines).enumerate()
            {
                print_tokens(line, tokens, Some(line_idx));
            }
        }
    } else {
        let tokens = registry.tokenize(&args.grammar, &content)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        } else {
            print_tokens(&content, &tokens, None);
        }
    }

    Ok(())
}
