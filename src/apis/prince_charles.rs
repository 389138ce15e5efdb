use super::{absolute_url, RecordBuilder, UnitContext};
use crate::constants::{PRINCE_CHARLES_BASE_URL, PRINCE_CHARLES_CINEMA};
use crate::error::{Result, ScraperError};
use crate::types::{DateRange, ExtractionUnit, RawEventRecord};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Prince Charles Cinema, Leicester Square. What's On is server-rendered HTML with
/// every upcoming performance on one page.
pub struct PrinceCharlesCrawler {
    ctx: UnitContext,
    base_url: String,
}

impl PrinceCharlesCrawler {
    pub fn new(ctx: UnitContext) -> Self {
        Self::with_base_url(ctx, PRINCE_CHARLES_BASE_URL)
    }

    pub fn with_base_url(ctx: UnitContext, base_url: impl Into<String>) -> Self {
        Self {
            ctx,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn whats_on_url(&self) -> String {
        format!("{}/whats-on/", self.base_url)
    }
}

struct Selectors {
    film: Selector,
    title: Selector,
    running_time: Selector,
    performance_items: Selector,
    book_button: Selector,
    time: Selector,
    tag: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| ScraperError::Parse(format!("bad selector '{css}': {e:?}")))
        };
        Ok(Self {
            film: parse("div.film_list-outer")?,
            title: parse("a.liveeventtitle")?,
            running_time: parse("div.running-time span")?,
            performance_items: parse("div.performance-list-items-outer .heading, div.performance-list-items-outer li")?,
            book_button: parse("a.film_book_button")?,
            time: parse("span.time")?,
            tag: parse(".movietag span.tag")?,
        })
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Running time in minutes from spans such as "114mins"
fn runtime_minutes(film: ElementRef<'_>, selectors: &Selectors) -> Option<u64> {
    film.select(&selectors.running_time)
        .map(element_text)
        .filter(|text| text.to_ascii_lowercase().contains("min"))
        .find_map(|text| {
            let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// One raw record per bookable performance. Dates come from the nearest preceding
/// heading ("Friday 26th December"); resolving the year is left to the normalizer.
pub fn parse_whats_on(html: &str, base_url: &str) -> Result<Vec<RawEventRecord>> {
    let selectors = Selectors::new()?;
    let document = Html::parse_document(html);
    let page_url = format!("{base_url}/whats-on/");

    let mut records = Vec::new();
    for film in document.select(&selectors.film) {
        let Some(title_el) = film.select(&selectors.title).next() else {
            continue;
        };
        let title = element_text(title_el);
        let runtime = runtime_minutes(film, &selectors);

        let mut current_date: Option<String> = None;
        for item in film.select(&selectors.performance_items) {
            if has_class(item, "heading") {
                current_date = Some(element_text(item));
                continue;
            }
            let Some(button) = item.select(&selectors.book_button).next() else {
                continue;
            };
            let Some(date) = current_date.clone() else {
                continue;
            };
            let time = button.select(&selectors.time).next().map(element_text);

            let mut labels: Vec<String> = item.select(&selectors.tag).map(element_text).collect();
            if item.value().classes().any(|c| c.contains("soldfilm_book_button")) {
                labels.push("Sold Out".to_string());
            }

            let booking_url = button
                .value()
                .attr("href")
                .and_then(|href| absolute_url(&page_url, href));

            records.push(
                RecordBuilder::new()
                    .text("title", Some(title.clone()))
                    .text("date", Some(date))
                    .text("time", time)
                    .text("booking_url", booking_url)
                    .value("runtime_minutes", runtime.map(Value::from))
                    .labels(labels)
                    .build(),
            );
        }
    }
    Ok(records)
}

#[async_trait::async_trait]
impl ExtractionUnit for PrinceCharlesCrawler {
    fn cinema_id(&self) -> &str {
        PRINCE_CHARLES_CINEMA
    }

    #[instrument(skip(self))]
    async fn discover(&self, _range: &DateRange) -> Result<Vec<RawEventRecord>> {
        let response = self
            .ctx
            .fetcher
            .fetch(&self.whats_on_url(), &[], self.ctx.cache_ttl)
            .await?;

        let records = parse_whats_on(&response.text(), &self.base_url)?;
        if records.is_empty() {
            warn!("No performances found on the Prince Charles What's On page");
        }
        info!("Found {} Prince Charles performances", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <div class="film_list-outer">
      <a class="liveeventtitle" href="/film/1/">Paris, Texas</a>
      <div class="running-time"><span>1984</span><span>(15)</span><span>145mins</span></div>
      <div class="performance-list-items-outer">
        <div class="heading">Friday 7th June</div>
        <ul>
          <li class="">
            <a class="film_book_button" href="/booking/501/"><span class="time">2:30 pm</span></a>
            <div class="movietag"><span class="tag">35mm</span></div>
          </li>
          <li class="soldfilm_book_button">
            <a class="film_book_button" href="/booking/502/"><span class="time">8:45 pm</span></a>
          </li>
        </ul>
        <div class="heading">Saturday 8th June</div>
        <ul>
          <li><a class="film_book_button" href="/booking/503/"><span class="time">6:00 pm</span></a></li>
          <li><span>No booking button</span></li>
        </ul>
      </div>
    </div>
    <div class="film_list-outer"><p>Untitled promo block</p></div>
    "#;

    #[test]
    fn test_parses_performances_under_headings() {
        let records = parse_whats_on(PAGE, "https://princecharlescinema.com").unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0]["title"], "Paris, Texas");
        assert_eq!(records[0]["date"], "Friday 7th June");
        assert_eq!(records[0]["time"], "2:30 pm");
        assert_eq!(records[0]["runtime_minutes"], 145);
        assert_eq!(records[0]["labels"], serde_json::json!(["35mm"]));
        assert_eq!(
            records[0]["booking_url"],
            "https://princecharlescinema.com/booking/501/"
        );

        assert_eq!(records[1]["labels"], serde_json::json!(["Sold Out"]));
        assert_eq!(records[2]["date"], "Saturday 8th June");
        assert!(records[2].get("labels").is_none());
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        let records = parse_whats_on("<html></html>", "https://princecharlescinema.com").unwrap();
        assert!(records.is_empty());
    }
}
