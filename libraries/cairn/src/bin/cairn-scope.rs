use std::path::PathBuf;

use cairn::{Collection, Entity, Record};

fn main() {
    let Some(file_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: cairn-scope <path-to-collection-file>");
        eprintln!("\nExample: cairn-scope ./races.json");
        std::process::exit(1);
    };

    let bytes = match std::fs::read(&file_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", file_path.display());
            std::process::exit(1);
        }
    };

    println!("CairnScope - Stored Collection Analyzer");
    println!("=======================================");
    println!("File: {}", file_path.display());
    println!("Size: {} bytes ({:.2} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!();

    let collection = match Collection::<Record>::from_json_bytes(&bytes) {
        Ok(collection) => collection,
        Err(e) => {
            println!("❌ Not a JSON object: {e}");
            println!("   The store will reset this file to an empty collection on next startup.");
            std::process::exit(2);
        }
    };

    println!("Entities:");
    println!("---------");
    if collection.is_empty() {
        println!("  No entities stored");
    }

    let mut entries: Vec<(&str, &Record)> = collection.iter().collect();
    entries.sort_by_key(|(key, _)| *key);

    // keys are what the store looks entities up by; `id` fields can disagree if the file was edited by hand
    let mut mismatched_ids = 0;
    for (key, record) in &entries {
        let name = record
            .get("name")
            .and_then(|name| name.as_str())
            .unwrap_or("(unnamed)");
        println!("  {key}: {name}");

        let preview =
            serde_json::to_string(record.fields()).unwrap_or_else(|_| "Invalid JSON".to_string());
        println!("      Data: {}", truncate(&preview, 100));

        if record.id() != *key {
            mismatched_ids += 1;
            println!("      ⚠️  id field is {:?}", record.id());
        }
    }

    let unreadable: Vec<_> = collection.unreadable().collect();
    for (key, value) in &unreadable {
        println!("  ⚠️  {key} doesn't decode: {}", truncate(&value.to_string(), 100));
    }

    println!();
    println!("Summary:");
    println!("--------");
    println!("  Total entities: {}", collection.len());
    if !unreadable.is_empty() {
        println!("  ⚠️  {} value(s) kept as stored but not readable", unreadable.len());
    }
    if mismatched_ids == 0 {
        println!("  ✅ Every key matches its entity's id");
    } else {
        println!("  ⚠️  {mismatched_ids} key(s) don't match their entity's id");
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    // back up to a character boundary
    let mut end = max;
    while !text.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
