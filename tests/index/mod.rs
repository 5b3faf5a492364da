mod search;
mod upsert;
