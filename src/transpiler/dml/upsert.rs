//! UPSERT conflict handling for dialects with `ON CONFLICT`.

use crate::ast::Insert;
use crate::transpiler::conditions::SqlContext;

/// `ON CONFLICT (keys) DO UPDATE SET c = excluded.c, ...`
///
/// Key columns and columns only managed on insert keep their stored value.
/// When nothing is left to update the conflict is ignored.
pub fn build_on_conflict(ctx: &SqlContext, insert: &Insert) -> String {
    let keys: Vec<String> = insert
        .keys
        .iter()
        .map(|k| ctx.generator.quote_identifier(k))
        .collect();

    let updates: Vec<String> = insert
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !insert.keys.contains(c))
        .filter(|(i, _)| {
            !insert.elements.get(*i).and_then(|e| e.as_ref()).is_some_and(|e| {
                e.has_annotation("@cds.on.insert") && !e.has_annotation("@cds.on.update")
            })
        })
        .map(|(_, c)| {
            let column = ctx.generator.quote_identifier(c);
            format!("{} = excluded.{}", column, column)
        })
        .collect();

    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", "))
    } else {
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", keys.join(", "), updates.join(", "))
    }
}
