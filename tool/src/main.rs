//! トライアーカイブを管理するユーティリティ
//!
//! このバイナリは、テキストソースからのアーカイブ構築と、構築済み
//! アーカイブへの問い合わせ(完全一致・接頭辞・全件出力)を提供します。

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use xtrie::{Trie, TrieKind};

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "trie-tool", about = "Manages double-array trie archives", version)]
struct Args {
    /// Archive file to build or query.
    archive: PathBuf,

    /// Build the archive from SOURCE (one `value key` record per line).
    #[clap(short = 'b', long = "build", value_name = "SOURCE")]
    build: Option<PathBuf>,

    /// Look QUERY up in the archive.
    #[clap(short = 'q', long = "query", value_name = "QUERY")]
    query: Option<String>,

    /// Prefix mode query.
    #[clap(short = 'p', long)]
    prefix: bool,

    /// Dump every record in the archive.
    #[clap(short = 'd', long)]
    dump: bool,

    /// Archive type: 1 = tail-trie, 2 = two-trie.
    #[clap(short = 't', long = "type", value_name = "TYPE", default_value_t = 2)]
    trie_type: u32,

    /// Progress output on stderr.
    #[clap(short = 'v', long)]
    verbose: bool,
}

/// テキストソースからアーカイブを構築します。
fn build_archive(args: &Args, source: &PathBuf) -> Result<ExitCode, Box<dyn Error>> {
    let kind = match args.trie_type {
        1 => TrieKind::Tail,
        2 => TrieKind::Two,
        other => return Err(format!("unknown archive type: {other}").into()),
    };
    let mut trie = Trie::new(kind, 4096);
    trie.read_from_text(source, args.verbose)?;
    if args.verbose {
        eprintln!("writing to disk...");
    }
    trie.build(&args.archive, args.verbose)?;
    if args.verbose {
        eprintln!("done");
    }
    Ok(ExitCode::SUCCESS)
}

/// アーカイブへ問い合わせます。
///
/// 完全一致ではヒットした値を標準出力へ、ミスでは標準エラーへの
/// 通知と終了コード1を返します。接頭辞モードでは`値 キー`の行を
/// 列挙します。
fn query_archive(args: &Args, query: &str) -> Result<ExitCode, Box<dyn Error>> {
    let trie = Trie::from_archive(&args.archive)?;
    if args.prefix || args.dump {
        for (word, value) in trie.prefix_search(query.as_bytes()) {
            println!("{} {}", value, String::from_utf8_lossy(&word));
        }
        Ok(ExitCode::SUCCESS)
    } else {
        match trie.search(query.as_bytes()) {
            Some(value) => {
                println!("{value}");
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("{query} not found.");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    if let Some(source) = args.build.clone() {
        build_archive(&args, &source)
    } else if let Some(query) = args.query.clone() {
        query_archive(&args, &query)
    } else if args.dump {
        query_archive(&args, "")
    } else {
        use clap::CommandFactory;
        Args::command().print_help()?;
        Ok(ExitCode::SUCCESS)
    }
}
