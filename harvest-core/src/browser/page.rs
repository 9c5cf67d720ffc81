use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::catalog::{CategoryLink, CategorySource};
use crate::config::SelectorSection;
use crate::discovery::{
    field, fingerprint_handles, AdvanceAction, AdvanceKind, FieldMap, PageDriver, PositionSignal,
    RecordExtractor, SnapshotItem, SnapshotProvider,
};

use super::automation::BrowserContext;
use super::error::{BrowserError, BrowserResult};

const VISIBLE_FN: &str =
    "const visible = (el) => !!el && (el.offsetParent !== null || el.getClientRects().length > 0);";

const DOCUMENT_HEIGHT_EXPR: &str = "Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement ? document.documentElement.scrollHeight : 0)";

/// One product card as captured by a snapshot. Fields are read in the same
/// script call that enumerates the cards, so the handle stays valid after
/// the page re-renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHandle {
    pub index: usize,
    pub fields: FieldMap,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    title: Option<String>,
    price: Option<String>,
    description: Option<String>,
    rating: Option<String>,
    review_count: Option<String>,
    stars: Option<String>,
    url: Option<String>,
}

impl RawProduct {
    fn into_handle(self, index: usize) -> ProductHandle {
        let mut fields = FieldMap::new();
        fields.insert(field::TITLE.into(), self.title);
        fields.insert(field::PRICE.into(), self.price);
        fields.insert(field::DESCRIPTION.into(), self.description);
        fields.insert(field::RATING.into(), self.rating);
        fields.insert(field::REVIEW_COUNT.into(), self.review_count);
        fields.insert(field::STARS.into(), self.stars);
        fields.insert(field::URL.into(), self.url);
        ProductHandle { index, fields }
    }
}

#[derive(Debug, Deserialize)]
struct RawLink {
    name: String,
    url: String,
}

#[derive(Debug, Clone)]
struct PageScripts {
    active_page: String,
    loading_indicator: String,
    end_markers: String,
    next_page: String,
    snapshot: String,
    category_links: String,
    subcategory_links: String,
}

impl PageScripts {
    fn compile(selectors: &SelectorSection) -> BrowserResult<Self> {
        let container = js_literal(&selectors.product_container)?;
        let title = js_literal(&selectors.title)?;
        let price = js_literal(&selectors.price)?;
        let description = js_literal(&selectors.description)?;
        let rating = js_literal(&selectors.rating)?;
        let review_count = js_literal(&selectors.review_count)?;
        let stars = js_literal(&selectors.stars)?;
        let loading = js_literal(&selectors.loading_indicator)?;
        let end_markers = js_literal(&selectors.end_of_content)?;
        let pagination = js_literal(&selectors.pagination_container)?;
        let next_label = js_literal(&selectors.next_page_label)?;
        let active = js_literal(&selectors.active_page)?;
        let category = js_literal(&selectors.category_link)?;
        let subcategory = js_literal(&selectors.subcategory_link)?;

        let active_page = format!(
            r#"(() => {{
    const el = document.querySelector({active});
    if (!el) return 1;
    const n = parseInt((el.textContent || '').replace(/\D+/g, ''), 10);
    return Number.isFinite(n) && n > 0 ? n : 1;
}})()"#
        );

        let loading_indicator = format!(
            r#"(() => {{
    {VISIBLE_FN}
    return Array.from(document.querySelectorAll({loading})).some(visible);
}})()"#
        );

        let end_markers = format!(
            r#"(() => {{
    {VISIBLE_FN}
    return {end_markers}.some((sel) => Array.from(document.querySelectorAll(sel)).some(visible));
}})()"#
        );

        let next_page = format!(
            r#"(() => {{
    {VISIBLE_FN}
    const container = document.querySelector({pagination});
    if (!visible(container)) return false;
    const label = {next_label};
    const matches = (el) => (el.textContent || '').trim() === label;
    for (const el of container.querySelectorAll('li.disabled span, li.disabled a')) {{
        if (matches(el)) return false;
    }}
    const link = Array.from(container.querySelectorAll('a'))
        .find((a) => matches(a) && a.getAttribute('href'));
    if (!link) return false;
    link.click();
    return true;
}})()"#
        );

        let snapshot = format!(
            r#"(() => {{
    const text = (root, sel) => {{
        const el = root.querySelector(sel);
        if (!el) return null;
        const value = (el.textContent || '').trim();
        return value.length ? value : null;
    }};
    return Array.from(document.querySelectorAll({container})).map((card) => {{
        const titleEl = card.querySelector({title});
        let link = null;
        if (titleEl) {{
            link = titleEl.tagName === 'A' ? titleEl : titleEl.querySelector('a');
        }}
        return {{
            title: text(card, {title}),
            price: text(card, {price}),
            description: text(card, {description}),
            rating: text(card, {rating}),
            review_count: text(card, {review_count}),
            stars: String(card.querySelectorAll({stars}).length),
            url: link && link.href ? link.href : null,
        }};
    }});
}})()"#
        );

        Ok(Self {
            active_page,
            loading_indicator,
            end_markers,
            next_page,
            snapshot,
            category_links: links_script(&category),
            subcategory_links: links_script(&subcategory),
        })
    }
}

/// Visible anchors matching `selector` that carry both text and a target.
fn links_script(selector: &str) -> String {
    format!(
        r#"(() => {{
    {VISIBLE_FN}
    return Array.from(document.querySelectorAll({selector}))
        .filter((a) => visible(a) && a.href && (a.textContent || '').trim().length)
        .map((a) => ({{ name: a.textContent.trim(), url: a.href }}));
}})()"#
    )
}

fn js_literal<T: Serialize + ?Sized>(value: &T) -> BrowserResult<String> {
    serde_json::to_string(value)
        .map_err(|err| BrowserError::Configuration(format!("invalid selector: {err}")))
}

/// Chromium tab acting as both the page driver and the snapshot provider
/// for product listings.
#[derive(Debug, Clone)]
pub struct ChromiumPage {
    context: BrowserContext,
    scripts: PageScripts,
    description_prefix_chars: usize,
}

impl ChromiumPage {
    pub fn new(
        context: BrowserContext,
        selectors: &SelectorSection,
        description_prefix_chars: usize,
    ) -> BrowserResult<Self> {
        Ok(Self {
            context,
            scripts: PageScripts::compile(selectors)?,
            description_prefix_chars,
        })
    }

    pub fn context(&self) -> &BrowserContext {
        &self.context
    }

    async fn eval<T>(&self, script: &str, what: &str) -> BrowserResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.context
            .page()
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to evaluate {what}: {err}")))?
            .into_value()
            .map_err(|err| BrowserError::Extraction(format!("failed to decode {what}: {err}")))
    }

    async fn links(&self, script: &str, what: &str) -> BrowserResult<Vec<CategoryLink>> {
        let raw: Vec<RawLink> = self.eval(script, what).await?;
        Ok(raw
            .into_iter()
            .map(|link| CategoryLink::new(link.name, link.url))
            .collect())
    }

    pub async fn capture_products(&self) -> BrowserResult<Vec<ProductHandle>> {
        let raw: Vec<RawProduct> = self.eval(&self.scripts.snapshot, "product snapshot").await?;
        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(index, product)| product.into_handle(index))
            .collect())
    }
}

#[async_trait(?Send)]
impl PageDriver for ChromiumPage {
    async fn open(&mut self, url: &str) -> BrowserResult<()> {
        debug!(url, "opening listing");
        self.context.goto(url).await
    }

    async fn current_position(&mut self, kind: AdvanceKind) -> BrowserResult<PositionSignal> {
        let value: f64 = match kind {
            AdvanceKind::Scroll => self.eval(DOCUMENT_HEIGHT_EXPR, "document height").await?,
            AdvanceKind::Paginate => self.eval(&self.scripts.active_page, "active page").await?,
        };
        Ok(PositionSignal(value.max(0.0) as u64))
    }

    async fn is_loading_indicator_visible(&mut self) -> BrowserResult<bool> {
        self.eval(&self.scripts.loading_indicator, "loading indicator")
            .await
    }

    async fn is_end_marker_visible(&mut self) -> BrowserResult<bool> {
        self.eval(&self.scripts.end_markers, "end-of-content markers")
            .await
    }

    async fn perform_advance_action(&mut self, action: AdvanceAction) -> BrowserResult<bool> {
        let performed: bool = match action {
            AdvanceAction::ScrollToBottom => {
                let script = format!(
                    "(() => {{ window.scrollTo(0, {DOCUMENT_HEIGHT_EXPR}); return true; }})()"
                );
                self.eval(&script, "scroll to bottom").await?
            }
            AdvanceAction::ScrollBy(pixels) => {
                let script = format!("(() => {{ window.scrollBy(0, {pixels}); return true; }})()");
                self.eval(&script, "incremental scroll").await?
            }
            AdvanceAction::NextPage => self.eval(&self.scripts.next_page, "next page").await?,
        };
        trace!(?action, performed, "advance action");
        self.context
            .with_metrics(|metrics| metrics.record_advance(performed));
        Ok(performed)
    }
}

impl RecordExtractor<ProductHandle> for ChromiumPage {
    fn extract_fields(&self, handle: &ProductHandle) -> FieldMap {
        handle.fields.clone()
    }
}

#[async_trait(?Send)]
impl SnapshotProvider for ChromiumPage {
    type Handle = ProductHandle;

    async fn snapshot(&mut self) -> BrowserResult<Vec<SnapshotItem<ProductHandle>>> {
        let handles = self.capture_products().await?;
        self.context
            .with_metrics(|metrics| metrics.record_snapshot(handles.len()));
        Ok(fingerprint_handles(
            handles,
            &*self,
            self.description_prefix_chars,
        ))
    }
}

#[async_trait(?Send)]
impl CategorySource for ChromiumPage {
    async fn categories(&mut self) -> BrowserResult<Vec<CategoryLink>> {
        self.links(&self.scripts.category_links, "category links")
            .await
    }

    async fn subcategories(&mut self, parent: &CategoryLink) -> BrowserResult<Vec<CategoryLink>> {
        // The sidebar only expands the active category.
        self.open(&parent.url).await?;
        let links = self
            .links(&self.scripts.subcategory_links, "subcategory links")
            .await?;
        Ok(links.into_iter().map(|link| link.under(parent)).collect())
    }
}
