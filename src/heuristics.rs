// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Spam and automation heuristics.
//!
//! Cheap, synchronous checks run before any network call:
//! - User-Agent signature matching
//! - Keyword denylist for message content
//! - Link detection
//! - Honeypot field

/// User-Agent fragments of HTTP libraries, headless browsers and crawlers.
const BOT_SIGNATURES: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww-perl",
    "node-fetch",
    "axios",
    "postman",
    "insomnia",
    "scrapy",
    "headlesschrome",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    // Crawlers announce themselves as `<name>bot/<version>` or with a
    // contact URL; a bare "bot" also hits device names such as Cubot.
    "googlebot",
    "bingbot",
    "yandexbot",
    "duckduckbot",
    "applebot",
    "facebookexternalhit",
    "bot/",
    "bot;",
    "+http",
    "crawler",
    "spider",
    "scraper",
];

/// Tokens every mainstream browser User-Agent carries at least one of.
const BROWSER_TOKENS: &[&str] = &["mozilla", "chrome", "safari", "firefox", "edge", "opera"];

/// Phrases that only show up in spam.
const SPAM_KEYWORDS: &[&str] = &[
    // Financial scams
    "bitcoin",
    "cryptocurrency",
    "forex",
    "investment opportunity",
    "free money",
    "make money fast",
    "earn money",
    "guaranteed",
    "no risk",
    "loan offer",
    "casino",
    "lottery",
    "wire transfer",
    // Adult content and pharma
    "viagra",
    "cialis",
    "porn",
    "xxx",
    "sexy singles",
    "dating site",
    // SEO and engagement bait
    "click here",
    "seo services",
    "backlinks",
    "rank your website",
    "increase your traffic",
    "buy now",
    "limited time offer",
    "congratulations you",
    "you have won",
];

/// Returns true if the User-Agent looks automated.
///
/// Empty agents, known automation signatures and agents without any
/// browser token all count as automated.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.trim().to_lowercase();
    if ua.is_empty() {
        return true;
    }

    if BOT_SIGNATURES.iter().any(|sig| ua.contains(sig)) {
        return true;
    }

    !BROWSER_TOKENS.iter().any(|token| ua.contains(token))
}

/// Returns true if the text contains a denylisted keyword (case-insensitive).
pub fn contains_spam_keywords(text: &str) -> bool {
    let text = text.to_lowercase();
    SPAM_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// Returns true if the text contains an `http://`, `https://` or `www.` link.
pub fn contains_urls(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("http://") || text.contains("https://") || text.contains("www.")
}

/// Returns true if the hidden `website` field was filled in.
pub fn is_honeypot_filled(website: Option<&str>) -> bool {
    website.is_some_and(|value| !value.trim().is_empty())
}
