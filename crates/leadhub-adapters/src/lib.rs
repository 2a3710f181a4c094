//! Lead sources: profile search, company lookup, and job board clients.

mod company;
mod job_boards;
mod linkedin;
mod search;
mod snippet;

pub use company::{match_company, size_bucket, CompanyCache, CompanyInfoScraper};
pub use job_boards::{GreenhouseClient, JobBoardClient, JobBoardRegistry, LeverClient};
pub use linkedin::{build_profile_query, Paging, ProfileSearchScraper};
pub use search::{
    KnowledgeGraph, SearchApi, SearchPage, SearchRequest, SearchResult, SerpApiClient,
    SERPAPI_ORIGIN,
};
pub use snippet::{parse_search_result, ParseError};
