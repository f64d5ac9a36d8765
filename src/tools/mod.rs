mod listing;
mod maintenance;
mod search;
