//! Listing card extraction.
//!
//! An explicit state machine over [`HtmlEvent`]s. Outside a card every event
//! is ignored until a `<li>` carrying the card class and a product id opens.
//! Inside a card, a [`CardAccumulator`] collects text and tracks which
//! sub-element is open (price block, characteristics list and its current
//! line, primary link). The card is emitted when its own `</li>` arrives,
//! when a new card opens first (unclosed markup), or at end of input.
//!
//! Emitted cards become [`ListingItem`]s only with a non-empty name and a
//! parsed price; the rest are dropped silently but still counted, so callers
//! can tell an empty listing from a listing of unusable cards.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use super::config::ListingSelectors;
use super::events::{HtmlEvent, OpenTag, tokenize};
use super::price::{looks_like_price, normalize_price};
use crate::domain::{Attribute, ListingItem};

static NAME_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}|[|\n\r]").expect("name break pattern is valid"));

static ATTRIBUTE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[:\-–—]\s*").expect("separator pattern is valid"));

static LEADING_BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s\u{00A0}]*[-–—•]+[\s\u{00A0}]*").expect("bullet pattern is valid")
});

/// Result of parsing one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Cards that carried a name and a price
    pub items: Vec<ListingItem>,
    /// Card elements seen, usable or not
    pub raw_items: usize,
}

impl ListingPage {
    /// No card elements at all: the category has no more pages.
    pub const fn is_end_of_listing(&self) -> bool {
        self.raw_items == 0
    }
}

/// Scanner position between two events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    OutsideItem,
    InsideItem(Box<CardAccumulator>),
}

/// Everything gathered for the card currently open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardAccumulator {
    external_id: String,
    data_name: Option<String>,
    meta_name: Option<String>,
    link_name: Option<String>,
    image_url: Option<String>,
    slug: Option<String>,
    attributes: Vec<Attribute>,
    text: Vec<String>,
    price_text: Vec<String>,
    /// Open non-void elements below the card element
    depth: usize,
    /// Open `<li>` elements below the card element
    li_depth: usize,
    price: Option<Scope>,
    attribute_list: Option<AttributeListScope>,
    link: Option<LinkScope>,
    /// Open `ul`/`ol` elements, innermost last
    lists: Vec<ListFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    name: String,
    level: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeListScope {
    level: usize,
    li_depth_at_open: usize,
    /// Text of the characteristic line being collected
    current: Option<Vec<String>>,
}

/// Where a list opened. Its close tag also ends any `<li>` left open inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListFrame {
    level: usize,
    li_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkScope {
    level: usize,
    text: Vec<String>,
}

impl Scope {
    fn closed_by(&self, name: &str, depth: usize) -> bool {
        name == self.name && depth <= self.level
    }
}

pub struct ListingParser {
    selectors: ListingSelectors,
    base_url: Url,
    product_path_prefix: String,
}

impl ListingParser {
    pub fn new(
        selectors: ListingSelectors,
        base_url: Url,
        product_path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            selectors,
            base_url,
            product_path_prefix: product_path_prefix.into(),
        }
    }

    pub fn parse(&self, html: &str) -> ListingPage {
        self.scan(tokenize(html))
    }

    /// Runs the state machine over any event sequence.
    pub fn scan<I>(&self, events: I) -> ListingPage
    where
        I: IntoIterator<Item = HtmlEvent>,
    {
        let mut page = ListingPage::default();
        let mut state = ScanState::OutsideItem;

        for event in events {
            let (next, finished) = self.step(state, &event);
            state = next;
            if let Some(card) = finished {
                self.collect(&mut page, *card);
            }
        }
        if let ScanState::InsideItem(card) = state {
            self.collect(&mut page, *card);
        }

        page
    }

    /// One transition. Returns the next state and the card finished by this
    /// event, if any.
    pub fn step(
        &self,
        state: ScanState,
        event: &HtmlEvent,
    ) -> (ScanState, Option<Box<CardAccumulator>>) {
        match (state, event) {
            (ScanState::OutsideItem, HtmlEvent::Open(tag)) => match self.card_start(tag) {
                Some(card) => (ScanState::InsideItem(Box::new(card)), None),
                None => (ScanState::OutsideItem, None),
            },
            (ScanState::OutsideItem, _) => (ScanState::OutsideItem, None),
            (ScanState::InsideItem(card), HtmlEvent::Open(tag)) => match self.card_start(tag) {
                // A new card before the previous one closed.
                Some(next) => (ScanState::InsideItem(Box::new(next)), Some(card)),
                None => (ScanState::InsideItem(self.open_inside(card, tag)), None),
            },
            (ScanState::InsideItem(card), HtmlEvent::Close(name)) => self.close_inside(card, name),
            (ScanState::InsideItem(mut card), HtmlEvent::Text(text)) => {
                card.push_text(text);
                (ScanState::InsideItem(card), None)
            }
        }
    }

    fn card_start(&self, tag: &OpenTag) -> Option<CardAccumulator> {
        if tag.name != "li" || !tag.class_contains(&self.selectors.item_class) {
            return None;
        }
        let external_id = tag.first_attr(&self.selectors.item_id_attributes)?;
        Some(CardAccumulator {
            external_id: external_id.to_string(),
            data_name: tag
                .attr(&self.selectors.item_name_attribute)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            ..CardAccumulator::default()
        })
    }

    fn open_inside(&self, mut card: Box<CardAccumulator>, tag: &OpenTag) -> Box<CardAccumulator> {
        let level = card.depth + 1;

        match tag.name.as_str() {
            "meta" if card.meta_name.is_none() => {
                if tag.attr("itemprop") == Some(self.selectors.name_itemprop.as_str()) {
                    card.meta_name = tag
                        .attr("content")
                        .map(str::trim)
                        .filter(|content| !content.is_empty())
                        .map(str::to_string);
                }
            }
            "img" if card.image_url.is_none() => {
                card.image_url = tag
                    .first_attr(&self.selectors.image_attributes)
                    .map(|src| self.absolute_url(src));
            }
            "li" if !tag.self_closing => {
                if let Some(list) = card.attribute_list.as_mut() {
                    if let Some(unclosed) = list.current.replace(Vec::new()) {
                        push_attribute(&mut card.attributes, &unclosed);
                    }
                }
                card.li_depth += 1;
            }
            "ul" if card.attribute_list.is_none()
                && tag.class_contains(&self.selectors.attribute_list_class) =>
            {
                card.attribute_list = Some(AttributeListScope {
                    level,
                    li_depth_at_open: card.li_depth,
                    current: None,
                });
            }
            "a" if card.link.is_none() && tag.class_contains(&self.selectors.link_class) => {
                card.link = Some(LinkScope {
                    level,
                    text: Vec::new(),
                });
                if card.slug.is_none() {
                    card.slug = tag.attr("href").and_then(|href| self.slug_from_href(href));
                }
            }
            _ => {}
        }

        if matches!(tag.name.as_str(), "ul" | "ol") && !tag.self_closing {
            card.lists.push(ListFrame {
                level,
                li_depth: card.li_depth,
            });
        }

        if card.price.is_none() && !tag.is_void() && tag.class_contains(&self.selectors.price_class) {
            card.price = Some(Scope {
                name: tag.name.clone(),
                level,
            });
        }

        if !tag.is_void() {
            card.depth = level;
        }
        card
    }

    fn close_inside(
        &self,
        mut card: Box<CardAccumulator>,
        name: &str,
    ) -> (ScanState, Option<Box<CardAccumulator>>) {
        if matches!(name, "ul" | "ol") {
            if let Some(frame) = card.lists.pop() {
                card.close_list(frame);
                return (ScanState::InsideItem(card), None);
            }
        }

        if name == "li" {
            if card.li_depth == 0 {
                return (ScanState::OutsideItem, Some(card));
            }
            if let Some(list) = card.attribute_list.as_mut() {
                if card.li_depth > list.li_depth_at_open {
                    if let Some(line) = list.current.take() {
                        push_attribute(&mut card.attributes, &line);
                    }
                }
            }
            card.li_depth -= 1;
        }

        let depth = card.depth;

        if card.price.as_ref().is_some_and(|scope| scope.closed_by(name, depth)) {
            card.price = None;
        }

        if name == "a" && card.link.as_ref().is_some_and(|link| depth <= link.level) {
            card.finish_link();
        }

        if !OpenTag::new(name).is_void() {
            card.depth = card.depth.saturating_sub(1);
        }
        (ScanState::InsideItem(card), None)
    }

    fn collect(&self, page: &mut ListingPage, card: CardAccumulator) {
        page.raw_items += 1;
        if let Some(item) = self.finalize(card) {
            page.items.push(item);
        }
    }

    /// Builds the item, or drops a card missing its name or price.
    fn finalize(&self, card: CardAccumulator) -> Option<ListingItem> {
        let name = card
            .meta_name
            .or_else(|| self.name_from_text(&card.text))?;

        let price_text = if card.price_text.is_empty() {
            card.text.join(" ")
        } else {
            card.price_text.join(" ")
        };
        let price = normalize_price(&price_text)?;

        let short_name = card
            .link_name
            .or(card.data_name)
            .unwrap_or_else(|| name.clone());

        Some(ListingItem {
            external_id: card.external_id,
            display_name: name,
            short_name,
            price,
            image_url: card.image_url,
            attributes: card.attributes,
            slug: card.slug,
        })
    }

    /// First text fragment long enough to be a name that carries no number.
    /// Text nodes are fragments of their own and are further split on line
    /// breaks, pipes and runs of whitespace.
    fn name_from_text(&self, texts: &[String]) -> Option<String> {
        texts
            .iter()
            .flat_map(|text| NAME_BREAK.split(text))
            .map(str::trim)
            .find(|piece| {
                !piece.is_empty()
                    && !looks_like_price(piece)
                    && piece.chars().count() >= self.selectors.min_name_chars
            })
            .map(str::to_string)
    }

    fn absolute_url(&self, src: &str) -> String {
        self.base_url
            .join(src)
            .map_or_else(|_| src.to_string(), String::from)
    }

    fn slug_from_href(&self, href: &str) -> Option<String> {
        let href = href.trim();
        let path = if href.contains("://") {
            let url = Url::parse(href).ok()?;
            if url.host_str() != self.base_url.host_str() {
                return None;
            }
            url.path().to_string()
        } else {
            href.split(['?', '#']).next().unwrap_or_default().to_string()
        };

        let trimmed = path.trim_matches('/');
        let prefix = self.product_path_prefix.trim_matches('/');
        let slug = if prefix.is_empty() {
            trimmed
        } else {
            trimmed
                .strip_prefix(prefix)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                .unwrap_or(trimmed)
        };
        let slug = slug.trim_matches('/');
        (!slug.is_empty()).then(|| slug.to_string())
    }
}

impl CardAccumulator {
    /// Closes a list together with every element still open inside it.
    fn close_list(&mut self, frame: ListFrame) {
        if self
            .attribute_list
            .as_ref()
            .is_some_and(|list| list.level == frame.level)
        {
            if let Some(line) = self.attribute_list.take().and_then(|list| list.current) {
                push_attribute(&mut self.attributes, &line);
            }
        }

        let depth = frame.level.saturating_sub(1);
        if self.price.as_ref().is_some_and(|scope| scope.level > depth) {
            self.price = None;
        }
        if self.link.as_ref().is_some_and(|link| link.level > depth) {
            self.finish_link();
        }
        self.li_depth = frame.li_depth;
        self.depth = depth;
    }

    fn finish_link(&mut self) {
        if let Some(link) = self.link.take() {
            let text = link.text.join(" ");
            let text = text.trim();
            if !text.is_empty() {
                self.link_name = Some(text.to_string());
            }
        }
    }

    fn push_text(&mut self, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        if self.price.is_some() {
            self.price_text.push(text.to_string());
        }
        if let Some(line) = self.attribute_list.as_mut().and_then(|list| list.current.as_mut()) {
            line.push(text.to_string());
        }
        if let Some(link) = self.link.as_mut() {
            link.text.push(text.to_string());
        }
        self.text.push(text.to_string());
    }
}

fn push_attribute(attributes: &mut Vec<Attribute>, fragments: &[String]) {
    let text = fragments.join(" ");
    let text = text.trim();
    if !text.is_empty() {
        attributes.push(split_attribute(text));
    }
}

/// Splits a characteristic line into key and value.
///
/// `": "` is preferred; otherwise the first colon or dash (any of `-–—`)
/// with surrounding spaces. Without a separator the whole line is the value.
pub fn split_attribute(text: &str) -> Attribute {
    let (key, value) = if let Some((key, value)) = text.split_once(": ") {
        (key.trim(), value.trim())
    } else if let Some(sep) = ATTRIBUTE_SEPARATOR.find(text) {
        (text[..sep.start()].trim(), text[sep.end()..].trim())
    } else {
        ("", text.trim())
    };

    let cleaned = LEADING_BULLET.replace(key, "");
    let cleaned = cleaned.trim();
    let key = if cleaned.is_empty() { key } else { cleaned };
    Attribute::new(key, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Price;

    fn parser() -> ListingParser {
        ListingParser::new(
            ListingSelectors::default(),
            Url::parse("https://shop.example").unwrap(),
            "product/",
        )
    }

    const FULL_CARD: &str = r#"
        <ul class="listing-cards">
          <li class="listing-cards__item" data-product-id="1001" data-product-name="Болт М8">
            <meta itemprop="name" content="Болт шестигранный М8х40 DIN 933">
            <a class="listing-cards__link" href="/product/bolt-m8x40-din-933/">Болт М8х40</a>
            <img class="lazy" src="/static/blank.gif" data-src="/media/bolt.webp">
            <ul class="listing-cards__list">
              <li>Диаметр: 8 мм</li>
              <li>Покрытие – цинк</li>
              <li>• Класс прочности: 8.8</li>
              <li>Без разделителя</li>
            </ul>
            <div class="card-price"><span>12&nbsp;345,67</span> ₽</div>
          </li>
        </ul>"#;

    #[test]
    fn extracts_every_field_of_a_card() {
        let page = parser().parse(FULL_CARD);
        assert_eq!(page.raw_items, 1);
        let item = &page.items[0];
        assert_eq!(item.external_id, "1001");
        assert_eq!(item.display_name, "Болт шестигранный М8х40 DIN 933");
        assert_eq!(item.short_name, "Болт М8х40");
        assert_eq!(item.price, Price::from_cents(1_234_567));
        assert_eq!(item.image_url.as_deref(), Some("https://shop.example/media/bolt.webp"));
        assert_eq!(item.slug.as_deref(), Some("bolt-m8x40-din-933"));
        assert_eq!(
            item.attributes,
            vec![
                Attribute::new("Диаметр", "8 мм"),
                Attribute::new("Покрытие", "цинк"),
                Attribute::new("Класс прочности", "8.8"),
                Attribute::new("", "Без разделителя"),
            ]
        );
    }

    #[test]
    fn keeps_only_complete_cards() {
        let html = r#"
            <li class="listing-cards__item" data-product-id="1">
              <span>Шайба плоская оцинкованная</span><div class="price">15,50 ₽</div>
            </li>
            <li class="listing-cards__item" data-product-id="2">
              <span>Гайка шестигранная оцинкованная</span><div class="price">по запросу</div>
            </li>"#;
        let page = parser().parse(html);
        assert_eq!(page.raw_items, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].external_id, "1");
        assert_eq!(page.items[0].display_name, "Шайба плоская оцинкованная");
        assert_eq!(page.items[0].short_name, "Шайба плоская оцинкованная");
        assert_eq!(page.items[0].price, Price::from_cents(1550));
    }

    #[test]
    fn unclosed_card_does_not_absorb_the_next_one() {
        let html = r#"
            <li class="listing-cards__item" data-id="1"><meta itemprop="name" content="Первый товар"><b class="price">10</b>
            <li class="listing-cards__item" data-id="2"><meta itemprop="name" content="Второй товар"><b class="price">20</b></li>"#;
        let page = parser().parse(html);
        assert_eq!(page.raw_items, 2);
        let names: Vec<_> = page.items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, ["Первый товар", "Второй товар"]);
        assert_eq!(page.items[0].price, Price::from_cents(1000));
        assert_eq!(page.items[1].price, Price::from_cents(2000));
    }

    #[test]
    fn implied_line_ends_close_with_their_list() {
        let html = r#"<li class="listing-cards__item" data-product-id="5">
              <meta itemprop="name" content="Труба ВГП 1&frac12; дюйма">
              <ul class="listing-cards__list"><li>Длина: 6 м<li>Вес: 2 кг</ul>
              <div class="price">100</div></li>
            <li class="listing-cards__item" data-product-id="6">
              <meta itemprop="name" content="Труба ВГП 2 дюйма"><b class="price">12&nbsp345,00 &#8381;</b></li>"#;
        let page = parser().parse(html);
        assert_eq!(page.raw_items, 2);

        let first = &page.items[0];
        assert_eq!(first.display_name, "Труба ВГП 1½ дюйма");
        assert_eq!(
            first.attributes,
            vec![Attribute::new("Длина", "6 м"), Attribute::new("Вес", "2 кг")]
        );
        assert_eq!(first.price, Price::from_cents(10_000));
        assert_eq!(page.items[1].price, Price::from_cents(1_234_500));
    }

    #[test]
    fn card_without_id_attribute_is_not_a_card() {
        let html = r#"<li class="listing-cards__item"><meta itemprop="name" content="Нет идентификатора"><b class="price">10</b></li>"#;
        let page = parser().parse(html);
        assert!(page.is_end_of_listing());
        assert!(page.items.is_empty());
    }

    #[test]
    fn price_falls_back_to_whole_card_text() {
        let html = r#"<li class="listing-cards__item" data-productid="7">
              <meta itemprop="name" content="Труба профильная">
              <p>Стоимость 1 250 ₽ за метр</p></li>"#;
        let page = parser().parse(html);
        assert_eq!(page.items[0].price, Price::from_cents(125_000));
    }

    #[test]
    fn name_heuristic_skips_short_and_numeric_fragments() {
        let html = "<li class=\"listing-cards__item\" data-product-id=\"3\">\
              <span>Хит</span><span>Артикул 4411</span>\
              <span>Саморез кровельный\nс шайбой</span><span class=\"price\">3,20</span></li>";
        let page = parser().parse(html);
        assert_eq!(page.items[0].display_name, "Саморез кровельный");
    }

    #[test]
    fn price_block_text_wins_over_other_numbers() {
        let html = r#"<li class="listing-cards__item" data-product-id="9">
              <meta itemprop="name" content="Уголок стальной">
              <span>В наличии 500 шт</span><div class="price">78,90</div></li>"#;
        let page = parser().parse(html);
        assert_eq!(page.items[0].price, Price::from_cents(7890));
    }

    #[test]
    fn scans_synthetic_event_sequences() {
        let events = vec![
            HtmlEvent::Open(
                OpenTag::new("li")
                    .with_attr("class", "listing-cards__item")
                    .with_attr("data-product-id", "55"),
            ),
            HtmlEvent::Open(OpenTag::new("span")),
            HtmlEvent::Text("Профнастил оцинкованный".into()),
            HtmlEvent::Close("span".into()),
            HtmlEvent::Open(OpenTag::new("span").with_attr("class", "price")),
            HtmlEvent::Text("990".into()),
            HtmlEvent::Close("span".into()),
            HtmlEvent::Close("li".into()),
            HtmlEvent::Text("outside".into()),
        ];
        let page = parser().scan(events);
        assert_eq!(page.raw_items, 1);
        assert_eq!(page.items[0].display_name, "Профнастил оцинкованный");
        assert_eq!(page.items[0].price, Price::from_cents(99_000));
    }

    #[test]
    fn empty_markup_is_end_of_listing() {
        let page = parser().parse("<html><body><p>Товары не найдены</p></body></html>");
        assert!(page.is_end_of_listing());
    }

    #[test]
    fn slug_comes_from_internal_links_only() {
        let p = parser();
        assert_eq!(p.slug_from_href("/product/abc-1/").as_deref(), Some("abc-1"));
        assert_eq!(
            p.slug_from_href("https://shop.example/product/abc-2/?ref=list").as_deref(),
            Some("abc-2")
        );
        assert_eq!(p.slug_from_href("https://other.example/product/abc/"), None);
        assert_eq!(p.slug_from_href("/product/"), None);
        assert_eq!(p.slug_from_href("/catalog/x/").as_deref(), Some("catalog/x"));
    }

    #[test]
    fn attribute_split_rules() {
        assert_eq!(split_attribute("Длина: 6 м"), Attribute::new("Длина", "6 м"));
        assert_eq!(split_attribute("Марка—Ст3"), Attribute::new("Марка", "Ст3"));
        assert_eq!(split_attribute("ГОСТ 8732"), Attribute::new("", "ГОСТ 8732"));
        assert_eq!(split_attribute("•• Вес: 2 кг"), Attribute::new("Вес", "2 кг"));
        assert_eq!(split_attribute("—: пусто"), Attribute::new("—", "пусто"));
    }
}
