use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quillbase_core::bookstore::sample_documents;
use quillbase_core::{
    Client, CollectionCore, Filter, FindOptions, Hint, LogLevel, MemoryStorage, Projection,
    SortDirection, StoreConfig, BOOK_FIELDS,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quillbase")]
#[command(about = "QuillBase CLI - query and aggregate a bookstore collection")]
#[command(version)]
struct Cli {
    /// JSON config file (StoreConfig)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON array of books to load; the sample catalogue when omitted
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// ERROR, WARN, INFO, DEBUG or TRACE (overrides config and QUILLBASE_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full bookstore walkthrough
    Run,
    /// Find documents matching a JSON filter
    Find {
        /// Filter, e.g. '{"published_year": {"$gt": 1950}}'
        #[arg(default_value = "{}")]
        filter: String,
        /// Options, e.g. '{"sort": {"price": -1}, "limit": 3}'
        #[arg(long)]
        options: Option<String>,
    },
    /// Run a JSON aggregation pipeline
    Aggregate {
        /// Pipeline, e.g. '[{"$group": {"_id": "$genre", "n": {"$sum": 1}}}]'
        pipeline: String,
    },
    /// Show the plan and execution statistics of a filter
    Explain {
        filter: String,
        /// Hint, e.g. '{"title": 1}', '"title_1"' or '{"$natural": 1}'
        #[arg(long)]
        hint: Option<String>,
        /// Comma-separated field lists to index first, e.g. 'title' 'author,published_year'
        #[arg(long = "index")]
        indexes: Vec<String>,
    },
    /// Create indexes and list every index on the collection
    Indexes {
        /// Comma-separated field list; repeatable
        #[arg(long = "create")]
        create: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_tracing(config.log_level());

    let client = Client::connect(config.clone()).context("Failed to connect")?;
    let books = client
        .default_database()
        .collection_with_schema(&config.collection, &BOOK_FIELDS)
        .with_context(|| format!("Failed to open collection '{}'", config.collection))?;
    let documents = load_documents(cli.data.as_deref())?;
    let inserted = books.insert_many(documents).context("Failed to load books")?;
    tracing::info!("loaded {} books", inserted.inserted_count);

    let outcome = match cli.command {
        Commands::Run => run_walkthrough(&books),
        Commands::Find { filter, options } => find(&books, &filter, options.as_deref()),
        Commands::Aggregate { pipeline } => aggregate(&books, &pipeline),
        Commands::Explain {
            filter,
            hint,
            indexes,
        } => explain(&books, &filter, hint.as_deref(), &indexes),
        Commands::Indexes { create } => list_indexes(&books, &create),
    };

    client.close().context("Failed to close client")?;
    println!("\nConnection closed");
    outcome
}

fn load_config(path: Option<&Path>, level: Option<&str>) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => StoreConfig::default(),
    }
    .with_env_overrides()
    .context("Invalid log level in environment")?;

    if let Some(level) = level {
        let parsed = LogLevel::parse(level)
            .with_context(|| format!("Unknown log level '{}'", level))?;
        config = config.with_log_level(parsed);
    }
    Ok(config)
}

fn init_tracing(level: LogLevel) {
    let directive = format!("quillbase={}", level.to_tracing());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn load_documents(path: Option<&Path>) -> Result<Vec<Value>> {
    let Some(path) = path else {
        return sample_documents().context("Failed to build sample books");
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", path.display()))?;
    match data {
        Value::Array(docs) => Ok(docs),
        _ => bail!("{} must contain a JSON array of books", path.display()),
    }
}

fn parse_json(label: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON for {}: {}", label, text))
}

fn parse_fields(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_docs(docs: &[Value]) -> Result<()> {
    for doc in docs {
        println!("{}", serde_json::to_string(doc)?);
    }
    Ok(())
}

// ========== COMMANDS ==========

fn find(books: &CollectionCore<MemoryStorage>, filter: &str, options: Option<&str>) -> Result<()> {
    let filter = Filter::from_json(&parse_json("filter", filter)?)?;
    let options = match options {
        Some(text) => FindOptions::from_json(&parse_json("options", text)?)?,
        None => FindOptions::new(),
    };
    let mut cursor = books.find_with_options(&filter, options)?;
    let docs = cursor.fetch_all()?;
    print_docs(&docs)?;
    eprintln!("{}", serde_json::to_string(&cursor.stats())?);
    Ok(())
}

fn aggregate(books: &CollectionCore<MemoryStorage>, pipeline: &str) -> Result<()> {
    let docs = books.aggregate_json(&parse_json("pipeline", pipeline)?)?;
    print_docs(&docs)
}

fn explain(
    books: &CollectionCore<MemoryStorage>,
    filter: &str,
    hint: Option<&str>,
    indexes: &[String],
) -> Result<()> {
    for spec in indexes {
        books
            .create_index(parse_fields(spec))
            .with_context(|| format!("Failed to create index on '{}'", spec))?;
    }
    let filter = Filter::from_json(&parse_json("filter", filter)?)?;
    let mut options = FindOptions::new();
    if let Some(hint) = hint {
        options = options.with_hint(Hint::from_json(&parse_json("hint", hint)?)?);
    }

    let plan = books.query_plan(&filter, options.hint.as_ref())?;
    let stats = books.explain_with_options(&filter, &options)?;
    let report = json!({
        "queryPlanner": {"parsedQuery": filter.to_json(), "winningPlan": plan.describe()},
        "executionStats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_indexes(books: &CollectionCore<MemoryStorage>, create: &[String]) -> Result<()> {
    for spec in create {
        let fields = parse_fields(spec);
        books
            .create_index(fields)
            .with_context(|| format!("Failed to create index on '{}'", spec))?;
    }
    for (i, index) in books.list_indexes()?.iter().enumerate() {
        println!("{}. {} {}", i + 1, index.name, index.key);
    }
    Ok(())
}

// ========== WALKTHROUGH ==========

fn title_of(doc: &Value) -> &str {
    doc["title"].as_str().unwrap_or("?")
}

fn run_walkthrough(books: &CollectionCore<MemoryStorage>) -> Result<()> {
    basic_crud(books)?;
    advanced_queries(books)?;
    aggregation(books)?;
    indexing(books)
}

fn basic_crud(books: &CollectionCore<MemoryStorage>) -> Result<()> {
    println!("=== Basic CRUD operations ===\n");

    println!("1. Books in the Fiction genre:");
    for book in books.find(&Filter::eq("genre", "Fiction"))? {
        let book = book?;
        println!("   - \"{}\" by {}", title_of(&book), book["author"].as_str().unwrap_or("?"));
    }

    println!("\n2. Books published after 1950:");
    for book in books.find(&Filter::gt("published_year", 1950))? {
        let book = book?;
        println!("   - \"{}\" ({})", title_of(&book), book["published_year"]);
    }

    println!("\n3. Books by George Orwell:");
    for book in books.find(&Filter::eq("author", "George Orwell"))? {
        let book = book?;
        println!("   - \"{}\" ({})", title_of(&book), book["published_year"]);
    }

    println!("\n4. Updating price of \"The Hobbit\":");
    let hobbit = Filter::eq("title", "The Hobbit");
    let updated = books.update_one(&hobbit, &json!({"$set": {"price": 15.99}}))?;
    println!("   updated {} document(s)", updated.modified_count);
    if let Some(book) = books.find_one(&hobbit)? {
        println!("   New price: {}", book["price"]);
    }

    println!("\n5. Deleting \"Moby Dick\":");
    let deleted = books.delete_one(&Filter::eq("title", "Moby Dick"))?;
    println!("   Deleted {} document(s)", deleted.deleted_count);
    Ok(())
}

fn advanced_queries(books: &CollectionCore<MemoryStorage>) -> Result<()> {
    println!("\n=== Advanced queries ===\n");

    println!("1. In-stock books published after 2000:");
    let recent = Filter::and(vec![Filter::eq("in_stock", true), Filter::gt("published_year", 2000)]);
    println!("   Found {} books", books.count_documents(&recent)?);

    println!("\n2. Fiction with projection (title, author, price):");
    let projected = books
        .find_with_options(
            &Filter::eq("genre", "Fiction"),
            FindOptions::new()
                .with_projection(Projection::include(["title", "author", "price"]).without_id())
                .with_limit(3),
        )?
        .fetch_all()?;
    for doc in &projected {
        println!("   {}", doc);
    }

    let by_price = |direction| {
        FindOptions::new()
            .sort_by("price", direction)
            .with_limit(3)
            .with_projection(Projection::include(["title", "price"]).without_id())
    };
    println!("\n3. Books sorted by price (ascending):");
    for book in books.find_with_options(&Filter::all(), by_price(SortDirection::Ascending))? {
        let book = book?;
        println!("   - \"{}\": {}", title_of(&book), book["price"]);
    }
    println!("\n4. Books sorted by price (descending):");
    for book in books.find_with_options(&Filter::all(), by_price(SortDirection::Descending))? {
        let book = book?;
        println!("   - \"{}\": {}", title_of(&book), book["price"]);
    }

    for (page, skip) in [(1, 0), (2, 5)] {
        println!("\n{}. Pagination - page {} (5 books):", 4 + page, page);
        let options = FindOptions::new()
            .sort_by("title", SortDirection::Ascending)
            .with_skip(skip)
            .with_limit(5)
            .with_projection(Projection::include(["title", "author"]).without_id());
        for (i, book) in books.find_with_options(&Filter::all(), options)?.enumerate() {
            let book = book?;
            println!(
                "   {}. \"{}\" by {}",
                i + 1,
                title_of(&book),
                book["author"].as_str().unwrap_or("?")
            );
        }
    }
    Ok(())
}

fn aggregation(books: &CollectionCore<MemoryStorage>) -> Result<()> {
    println!("\n=== Aggregation pipeline ===\n");

    println!("1. Average price by genre:");
    let by_genre = books.aggregate_json(&json!([
        {"$group": {"_id": "$genre", "averagePrice": {"$avg": "$price"}, "bookCount": {"$sum": 1}}},
        {"$sort": {"averagePrice": -1}}
    ]))?;
    for genre in &by_genre {
        println!(
            "   - {}: ${:.2} ({} books)",
            genre["_id"].as_str().unwrap_or("null"),
            genre["averagePrice"].as_f64().unwrap_or(0.0),
            genre["bookCount"]
        );
    }

    println!("\n2. Authors with most books:");
    let authors = books.aggregate_json(&json!([
        {"$group": {"_id": "$author", "bookCount": {"$sum": 1}}},
        {"$sort": {"bookCount": -1}},
        {"$limit": 3}
    ]))?;
    for (i, author) in authors.iter().enumerate() {
        println!(
            "   {}. {}: {} books",
            i + 1,
            author["_id"].as_str().unwrap_or("null"),
            author["bookCount"]
        );
    }

    println!("\n3. Books by publication decade:");
    let decades = books.aggregate_json(&json!([
        {"$project": {
            "title": 1,
            "published_year": 1,
            "decade": {"$subtract": ["$published_year", {"$mod": ["$published_year", 10]}]}
        }},
        {"$group": {"_id": "$decade", "bookCount": {"$sum": 1}, "books": {"$push": "$title"}}},
        {"$sort": {"_id": 1}}
    ]))?;
    for decade in &decades {
        println!("   - {}s: {} books", decade["_id"], decade["bookCount"]);
    }
    Ok(())
}

fn indexing(books: &CollectionCore<MemoryStorage>) -> Result<()> {
    println!("\n=== Indexing ===\n");

    println!("1. Creating index on title field...");
    books.create_index(["title"])?;
    println!("   Index created on title field.");

    println!("\n2. Creating compound index on author and published_year...");
    books.create_index(["author", "published_year"])?;
    println!("   Compound index created on author and published_year.");

    println!("\n3. Performance analysis with explain():");
    let filter = Filter::eq("title", "1984");
    for (label, hint) in [
        ("without index", Hint::Natural),
        ("with index", Hint::fields(["title"])),
    ] {
        let stats = books.explain_with_options(&filter, &FindOptions::new().with_hint(hint))?;
        println!("   Query {}:", label);
        println!("   Stage: {}", stats.stage);
        println!("   Documents examined: {}", stats.documents_examined);
        println!("   Execution Time (ms): {}", stats.execution_time_millis);
    }

    println!("\n4. Current indexes on books collection:");
    for (i, index) in books.list_indexes()?.iter().enumerate() {
        println!("   {}. {}", i + 1, index.key);
    }
    Ok(())
}
